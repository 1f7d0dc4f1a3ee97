//! Alert sinks

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::{AlertError, DrowsinessAlert};

/// Destination for drowsiness alerts. Fire-and-forget: delivery problems
/// are the sink's own business and never stop the frame loop.
pub trait AlertSink {
    fn notify(&self, alert: &DrowsinessAlert);
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn notify(&self, alert: &DrowsinessAlert) {
        (**self).notify(alert)
    }
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn notify(&self, alert: &DrowsinessAlert) {
        (**self).notify(alert)
    }
}

/// Logs every alert at warn level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: &DrowsinessAlert) {
        warn!(
            "Driver is showing signs of drowsiness at {:.2}s: {:.1}s drowsy ({:.1}% of window)",
            alert.timestamp.as_secs_f64(),
            alert.drowsiness_time_secs,
            alert.drowsy_fraction * 100.0
        );
    }
}

/// Forwards alerts over a bounded tokio channel without blocking the caller
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: mpsc::Sender<DrowsinessAlert>,
}

impl ChannelAlertSink {
    pub fn new(sender: mpsc::Sender<DrowsinessAlert>) -> Self {
        Self { sender }
    }

    /// Create a sink and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DrowsinessAlert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queue an alert, failing if the channel is full or closed
    pub fn try_send(&self, alert: &DrowsinessAlert) -> Result<(), AlertError> {
        self.sender.try_send(*alert).map_err(|e| match e {
            TrySendError::Full(_) => AlertError::ChannelFull,
            TrySendError::Closed(_) => AlertError::ChannelClosed,
        })
    }
}

impl AlertSink for ChannelAlertSink {
    fn notify(&self, alert: &DrowsinessAlert) {
        match self.try_send(alert) {
            Ok(()) => debug!("Alert queued at {:?}", alert.timestamp),
            Err(e) => warn!("Alert at {:?} not delivered: {}", alert.timestamp, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn alert(secs: u64) -> DrowsinessAlert {
        DrowsinessAlert {
            timestamp: Duration::from_secs(secs),
            drowsy_fraction: 0.09,
            drowsiness_time_secs: 5.4,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAlertSink::channel(4);
        sink.notify(&alert(1));
        sink.notify(&alert(2));

        assert_eq!(rx.recv().await, Some(alert(1)));
        assert_eq!(rx.recv().await, Some(alert(2)));
    }

    #[tokio::test]
    async fn test_channel_full_drops_alert() {
        let (sink, mut rx) = ChannelAlertSink::channel(1);
        assert_eq!(sink.try_send(&alert(1)), Ok(()));
        assert_eq!(sink.try_send(&alert(2)), Err(AlertError::ChannelFull));
        // notify never fails loudly
        sink.notify(&alert(3));

        assert_eq!(rx.recv().await, Some(alert(1)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_closed() {
        let (sink, rx) = ChannelAlertSink::channel(1);
        drop(rx);
        assert_eq!(sink.try_send(&alert(1)), Err(AlertError::ChannelClosed));
    }

    #[test]
    fn test_boxed_sink() {
        let sink: Box<dyn AlertSink> = Box::new(TracingAlertSink);
        sink.notify(&alert(1));
    }
}
