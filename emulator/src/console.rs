use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crossterm::style::Stylize;
use sensor_core::telemetry::{Severity, TelemetryRecord, TelemetrySink};

use crate::sim::VirtualClock;

/// One telemetry record rendered on the virtual clock.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsoleLine {
    pub at: Duration,
    pub severity: Severity,
    pub text: String,
}

impl ConsoleLine {
    pub fn plain(&self) -> String {
        format!(
            "[+{:>9} ms] {:<8} {}",
            self.at.as_millis(),
            self.severity.label(),
            self.text
        )
    }

    /// Same line with the level coloured for a terminal.
    pub fn colored(&self) -> String {
        let label = format!("{:<8}", self.severity.label());
        let label = match self.severity {
            Severity::Debug => label.dark_grey(),
            Severity::Info => label.green(),
            Severity::Warning => label.yellow(),
            Severity::Error => label.red(),
            Severity::Critical => label.red().bold(),
        };
        format!("[+{:>9} ms] {label} {}", self.at.as_millis(), self.text)
    }
}

/// Sink shared by every service in the emulated node. Each clone appends to
/// the same pending buffer, which the session drains after each command.
#[derive(Clone)]
pub struct ConsoleTelemetry {
    clock: VirtualClock,
    min_severity: Rc<Cell<Severity>>,
    pending: Rc<RefCell<Vec<ConsoleLine>>>,
}

impl ConsoleTelemetry {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            min_severity: Rc::new(Cell::new(Severity::Info)),
            pending: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn set_min_severity(&self, severity: Severity) {
        self.min_severity.set(severity);
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity.get()
    }

    pub fn take_lines(&self) -> Vec<ConsoleLine> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl TelemetrySink for ConsoleTelemetry {
    fn record(&mut self, record: TelemetryRecord) {
        if record.severity < self.min_severity.get() {
            return;
        }
        self.pending.borrow_mut().push(ConsoleLine {
            at: self.clock.elapsed(),
            severity: record.severity,
            text: format!("{}: {}", record.component.label(), record.event),
        });
    }
}
