//! Per-transaction output and the end-of-run summary.

use std::fmt;

use colored::{Color, Colorize};
use http::StatusCode;

use crate::config::RunConfig;
use crate::error::Error;
use crate::plan::Target;
use crate::stats::RunReport;
use crate::transaction::Transaction;

/// Renders verbose transaction lines, failure diagnostics, and the final
/// summary, honoring the run's display flags.
#[derive(Debug, Clone)]
pub struct Reporter {
    verbose: bool,
    csv: bool,
    color: bool,
    timestamp: bool,
    fullurl: bool,
    show_id: bool,
    mark: Option<String>,
}

impl Reporter {
    /// A reporter configured from the run's display flags.
    pub fn new(config: &RunConfig) -> Reporter {
        Reporter {
            verbose: config.verbose,
            csv: config.csv,
            color: config.color,
            timestamp: config.timestamp,
            fullurl: config.fullurl,
            show_id: config.show_id,
            mark: config.mark.clone(),
        }
    }

    pub(crate) fn transaction(&self, worker: usize, tx: &Transaction, target: &Target) {
        if !self.verbose {
            return;
        }
        let line = self.format_line(worker, tx, target);
        self.emit(line, status_color(tx.status));
    }

    pub(crate) fn failure(&self, worker: usize, err: &Error) {
        if !self.verbose {
            return;
        }
        let line = if self.show_id {
            format!("{worker:4}: {err}")
        } else {
            err.to_string()
        };
        self.emit(line, Color::Red);
    }

    /// Print the end-of-run summary.
    pub fn summary(&self, report: &RunReport) {
        eprintln!("{report}");
    }

    fn format_line(&self, worker: usize, tx: &Transaction, target: &Target) -> String {
        let when = if self.timestamp {
            format!("{} ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
        } else {
            String::new()
        };
        let shown = if self.fullurl {
            target.url().as_str().to_owned()
        } else {
            target.request_path()
        };
        let secs = tx.elapsed.as_secs_f64();

        if self.csv {
            let mark = match &self.mark {
                Some(mark) => format!("{mark},"),
                None => String::new(),
            };
            let id = if self.show_id {
                format!("{worker},")
            } else {
                String::new()
            };
            let wall = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            format!(
                "{when}{mark}{id}{},{},{secs:.2},{},{shown},{},{wall}",
                tx.protocol,
                tx.status.as_u16(),
                tx.bytes,
                target.id()
            )
        } else {
            let id = if self.show_id {
                format!("{worker:4}: ")
            } else {
                String::new()
            };
            format!(
                "{when}{id}{} {} {secs:6.2} secs: {:7} bytes ==> {shown}",
                tx.protocol,
                tx.status.as_u16(),
                tx.bytes
            )
        }
    }

    fn emit(&self, line: String, color: Color) {
        if self.color {
            println!("{}", line.color(color));
        } else {
            println!("{line}");
        }
    }
}

/// The status-class color policy: 2xx blue, 3xx cyan, 4xx magenta,
/// 5xx and anything unknown red.
pub(crate) fn status_color(status: StatusCode) -> Color {
    match status.as_u16() {
        200..=299 => Color::Blue,
        300..=399 => Color::Cyan,
        400..=499 => Color::Magenta,
        _ => Color::Red,
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.aborted {
            writeln!(f, "run aborted: failure budget exhausted")?;
        }
        writeln!(f, "Transactions:\t\t{:>12} hits", self.transactions)?;
        writeln!(f, "Availability:\t\t{:>12.2} %", self.availability)?;
        writeln!(f, "Elapsed time:\t\t{:>12.2} secs", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "Data transferred:\t{:>12.2} MB",
            self.bytes as f64 / (1024.0 * 1024.0)
        )?;
        writeln!(
            f,
            "Response time:\t\t{:>12.2} secs",
            self.response_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "Transaction rate:\t{:>12.2} trans/sec",
            self.transaction_rate
        )?;
        writeln!(f, "Throughput:\t\t{:>12.2} MB/sec", self.throughput)?;
        writeln!(f, "Concurrency:\t\t{:>12.2}", self.concurrency)?;
        writeln!(f, "Successful transactions:{:>12}", self.code_ok)?;
        writeln!(f, "Failed transactions:\t{:>12}", self.failed)?;
        writeln!(f, "HTTP 200 responses:\t{:>12}", self.ok200)?;
        writeln!(
            f,
            "Longest transaction:\t{:>12.2}",
            self.longest.as_secs_f64()
        )?;
        write!(
            f,
            "Shortest transaction:\t{:>12.2}",
            self.shortest.as_secs_f64()
        )
    }
}
