use crate::sender::CommandSink;
use fill_protocol::{Command, IgniterId, ValveName};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Queries every valve (spaced by `spacing`), then the MAV, then both
/// igniters. Valve state is never pushed by the station, so this sweep is the
/// only thing keeping those entries fresh.
pub async fn refresh_all(sink: &dyn CommandSink, spacing: Duration) {
    for valve in ValveName::ALL {
        send_logged(sink, &Command::GetValveState { valve });
        tokio::time::sleep(spacing).await;
    }
    send_logged(sink, &Command::GetMavState);
    for id in IgniterId::ALL {
        send_logged(sink, &Command::GetIgniterContinuity { id });
    }
}

pub(crate) fn send_logged(sink: &dyn CommandSink, cmd: &Command) {
    if let Err(e) = sink.send(cmd) {
        warn!("{} failed: {e}", cmd.name());
    }
}

/// Sleeps for `period` unless the stop flag flips first. Returns false once
/// the loop should exit.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => !*stop.borrow(),
        changed = stop.changed() => changed.is_ok() && !*stop.borrow(),
    }
}

pub async fn heartbeat_loop(
    sink: Arc<dyn CommandSink>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        if sink.is_connected() {
            send_logged(sink.as_ref(), &Command::Heartbeat);
        }
        if !wait_or_stop(&mut stop, period).await {
            break;
        }
    }
    debug!("heartbeat loop stopped");
}

pub async fn poll_loop(
    sink: Arc<dyn CommandSink>,
    period: Duration,
    spacing: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        if sink.is_connected() {
            refresh_all(sink.as_ref(), spacing).await;
        }
        if !wait_or_stop(&mut stop, period).await {
            break;
        }
    }
    debug!("poll loop stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records every command with the (possibly paused) clock reading.
    pub(crate) struct RecordingSink {
        pub connected: AtomicBool,
        pub sent: Mutex<Vec<(Instant, Command)>>,
        pub fail: AtomicBool,
    }

    impl RecordingSink {
        pub(crate) fn connected() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        pub(crate) fn commands(&self) -> Vec<Command> {
            self.sent.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
        }

        pub(crate) fn timed(&self) -> Vec<(Instant, Command)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl CommandSink for RecordingSink {
        fn send(&self, cmd: &Command) -> Result<(), ClientError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.sent.lock().unwrap().push((Instant::now(), cmd.clone()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::OutboundFull);
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_queries_every_entity_in_order() {
        let sink = RecordingSink::connected();
        refresh_all(sink.as_ref(), Duration::from_millis(50)).await;

        let mut expected: Vec<Command> = ValveName::ALL
            .into_iter()
            .map(|valve| Command::GetValveState { valve })
            .collect();
        expected.push(Command::GetMavState);
        expected.push(Command::GetIgniterContinuity { id: IgniterId::ONE });
        expected.push(Command::GetIgniterContinuity { id: IgniterId::TWO });
        assert_eq!(sink.commands(), expected);

        let timed = sink.timed();
        for pair in timed[..ValveName::COUNT].windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_survives_send_failures_and_stops_on_flag() {
        let sink = RecordingSink::connected();
        sink.fail.store(true, Ordering::SeqCst);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(heartbeat_loop(
            sink.clone(),
            Duration::from_secs(5),
            stop_rx,
        ));
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(sink.commands().len(), 3);

        stop_tx.send_replace(true);
        handle.await.unwrap();
        let count = sink.commands().len();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(sink.commands().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_idles_while_disconnected() {
        let sink = RecordingSink::connected();
        sink.connected.store(false, Ordering::SeqCst);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop(
            sink.clone(),
            Duration::from_secs(3),
            Duration::from_millis(50),
            stop_rx,
        ));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(sink.commands().is_empty());

        sink.connected.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink
            .commands()
            .contains(&Command::GetValveState { valve: ValveName::Sv1 }));

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }
}
