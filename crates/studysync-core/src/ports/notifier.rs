//! Notifier port - 通知の表示はホスト側の責務

use tracing::info;

pub trait Notifier: Send + Sync {
    fn post(&self, lessons: usize, reviews: usize, new_reviews: usize);

    fn cancel(&self);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn post(&self, lessons: usize, reviews: usize, new_reviews: usize) {
        info!(lessons, reviews, new_reviews, "study items available");
    }

    fn cancel(&self) {
        info!("notification cancelled");
    }
}
