//! Transfer progress accumulator shared with upload/download primitives.

/// Progress is logged on every Nth notification.
pub const REPORT_EVERY: u64 = 20;

/// Owned progress state for one transfer.
///
/// Transfers receive it as `&mut` and call [`TransferProgress::record`] for
/// each chunk moved. Reporting is cosmetic; callers never act on it.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    label: String,
    total_bytes: u64,
    processed_bytes: u64,
    notifications: u64,
}

impl TransferProgress {
    pub fn new(label: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            label: label.into(),
            total_bytes,
            processed_bytes: 0,
            notifications: 0,
        }
    }

    /// Set the total once it is known (downloads learn it from the first
    /// response).
    pub fn set_total(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    pub fn record(&mut self, bytes: u64) {
        self.processed_bytes = self.processed_bytes.saturating_add(bytes);
        self.notifications += 1;
        if self.notifications % REPORT_EVERY == 0 {
            tracing::info!("{} {:3.2}%", self.label, self.percent());
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.processed_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}
