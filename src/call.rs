//! Break-time audio call lifecycle.
//!
//! Calls exist only while the room is on break: the controller captures the
//! microphone when a break starts, dials everyone it is not yet connected
//! to, answers inbound calls, and tears everything down when work resumes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

use crate::events::notify;
use crate::peer::{AudioTransport, CallEvent, CallEvents};
use crate::room::RoomContext;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Roster-change sweeps re-dial at most this often, so a burst of presence
/// updates does not hammer the transport.
pub const SWEEP_MIN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct CallState {
    in_break: bool,
    mic_live: bool,
    muted: bool,
    connections: HashSet<String>,
    last_sweep: Option<Instant>,
}

pub struct CallController {
    transport: Arc<dyn AudioTransport>,
    state: Mutex<CallState>,
}

impl CallController {
    pub fn new(transport: Arc<dyn AudioTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(CallState::default()),
        }
    }

    pub fn transport_events(&self) -> CallEvents {
        self.transport.events()
    }

    /// Break started: capture the microphone and call the room.
    pub async fn start_break(&self, ctx: &RoomContext) {
        let muted = {
            let mut state = self.state.lock().unwrap();
            state.in_break = true;
            state.muted
        };
        match self.transport.capture_microphone().await {
            Ok(()) => {
                self.state.lock().unwrap().mic_live = true;
                self.transport.set_muted(muted);
                notify(&ctx.events, "Microphone is live", false);
                self.sweep(ctx, true).await;
            }
            Err(err) => {
                log_warn!("microphone capture failed: {err}");
                notify(&ctx.events, "Microphone access was denied", true);
            }
        }
    }

    /// Dials every other participant we are not connected to yet. Automatic
    /// sweeps (roster churn) are throttled; `force` bypasses the throttle
    /// for the break-start sweep.
    pub async fn sweep(&self, ctx: &RoomContext, force: bool) {
        let targets: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            if !state.in_break || !state.mic_live {
                return;
            }
            if !force {
                if let Some(last) = state.last_sweep {
                    if last.elapsed() < SWEEP_MIN_INTERVAL {
                        return;
                    }
                }
            }
            state.last_sweep = Some(Instant::now());
            let roster = ctx.roster.lock().unwrap();
            roster
                .keys()
                .filter(|peer| **peer != ctx.peer_id && !state.connections.contains(*peer))
                .cloned()
                .collect()
        };
        for peer in targets {
            match self.transport.dial(&peer).await {
                Ok(()) => {
                    log_info!("calling {peer}");
                    self.state.lock().unwrap().connections.insert(peer);
                }
                Err(err) => log_warn!("call to {peer} failed: {err}"),
            }
        }
    }

    /// Work resumed: drop the stream and every call.
    pub async fn end_break(&self) {
        let peers = {
            let mut state = self.state.lock().unwrap();
            state.in_break = false;
            state.mic_live = false;
            state.last_sweep = None;
            std::mem::take(&mut state.connections)
        };
        self.transport.release_microphone();
        for peer in peers {
            self.transport.hang_up(&peer);
        }
    }

    pub fn toggle_mute(&self) -> bool {
        let muted = {
            let mut state = self.state.lock().unwrap();
            state.muted = !state.muted;
            state.muted
        };
        self.transport.set_muted(muted);
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    pub async fn handle_event(&self, event: CallEvent) {
        match event {
            CallEvent::Incoming { from } => {
                let accept = {
                    let state = self.state.lock().unwrap();
                    state.in_break && state.mic_live
                };
                if !accept {
                    log_info!("ignoring call from {from} outside a break");
                    return;
                }
                match self.transport.answer(&from).await {
                    Ok(()) => {
                        self.state.lock().unwrap().connections.insert(from);
                    }
                    Err(err) => log_warn!("answering {from} failed: {err}"),
                }
            }
            CallEvent::RemoteStream { from } => {
                log_info!("audio from {from} attached");
            }
            CallEvent::Closed { peer } | CallEvent::Failed { peer, .. } => {
                self.state.lock().unwrap().connections.remove(&peer);
                self.transport.hang_up(&peer);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.end_break().await;
        self.transport.shutdown().await;
    }

    #[cfg(test)]
    fn connected_peers(&self) -> HashSet<String> {
        self.state.lock().unwrap().connections.clone()
    }
}

/// Pumps transport events into the controller until the session dies.
pub async fn call_events_loop(ctx: Arc<RoomContext>, calls: Arc<CallController>) {
    let mut events = calls.transport_events();
    let cancel = ctx.cancel.clone();
    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => calls.handle_event(event).await,
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomSettings;
    use crate::error::CallError;
    use crate::peer::CallEvents;
    use crate::room::model::Participant;
    use crate::store::memory::MemoryStore;
    use crate::store::SharedStore;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Default)]
    struct MockTransport {
        fail_capture: bool,
        dialed: Mutex<Vec<String>>,
        answered: Mutex<Vec<String>>,
        hung_up: Mutex<Vec<String>>,
        event_tx: Mutex<Option<UnboundedSender<CallEvent>>>,
    }

    #[async_trait]
    impl AudioTransport for MockTransport {
        async fn open(&self, _local_id: &str) -> Result<(), CallError> {
            Ok(())
        }

        async fn capture_microphone(&self) -> Result<(), CallError> {
            if self.fail_capture {
                Err(CallError::CaptureUnavailable("denied".into()))
            } else {
                Ok(())
            }
        }

        fn release_microphone(&self) {}

        async fn dial(&self, remote_id: &str) -> Result<(), CallError> {
            self.dialed.lock().unwrap().push(remote_id.to_string());
            Ok(())
        }

        async fn answer(&self, remote_id: &str) -> Result<(), CallError> {
            self.answered.lock().unwrap().push(remote_id.to_string());
            Ok(())
        }

        fn hang_up(&self, remote_id: &str) {
            self.hung_up.lock().unwrap().push(remote_id.to_string());
        }

        fn set_muted(&self, _muted: bool) {}

        fn events(&self) -> CallEvents {
            let (tx, events) = CallEvents::channel();
            *self.event_tx.lock().unwrap() = Some(tx);
            events
        }

        async fn shutdown(&self) {}
    }

    fn context() -> Arc<RoomContext> {
        let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RoomContext::new(
            Arc::new(MemoryStore::new()),
            "AB12CD".into(),
            "ME".into(),
            "Sam".into(),
            false,
            RoomSettings::default(),
            events_tx,
        );
        let now = ctx.store.now_ms();
        for peer in ["ME", "P1", "P2"] {
            let record = serde_json::json!({
                "nickname": peer, "peerId": peer, "lastSeen": now,
            });
            ctx.roster
                .lock()
                .unwrap()
                .insert(peer.to_string(), Participant::from_value(peer, Some(&record)));
        }
        Arc::new(ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn break_start_dials_everyone_else() {
        let transport = Arc::new(MockTransport::default());
        let calls = CallController::new(transport.clone());
        let ctx = context();

        calls.start_break(&ctx).await;

        let mut dialed = transport.dialed.lock().unwrap().clone();
        dialed.sort();
        assert_eq!(dialed, vec!["P1".to_string(), "P2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_are_throttled_and_skip_existing_connections() {
        let transport = Arc::new(MockTransport::default());
        let calls = CallController::new(transport.clone());
        let ctx = context();

        calls.start_break(&ctx).await;
        transport.dialed.lock().unwrap().clear();

        // inside the throttle window nothing happens
        calls.sweep(&ctx, false).await;
        assert!(transport.dialed.lock().unwrap().is_empty());

        tokio::time::advance(SWEEP_MIN_INTERVAL).await;
        ctx.roster.lock().unwrap().insert(
            "P3".into(),
            Participant::from_value("P3", None),
        );
        calls.sweep(&ctx, false).await;
        // only the newcomer is dialed
        assert_eq!(transport.dialed.lock().unwrap().clone(), vec!["P3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_denial_reports_and_skips_dialing() {
        let transport = Arc::new(MockTransport {
            fail_capture: true,
            ..Default::default()
        });
        let calls = CallController::new(transport.clone());
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = Arc::new(RoomContext::new(
            Arc::new(MemoryStore::new()),
            "AB12CD".into(),
            "ME".into(),
            "Sam".into(),
            false,
            RoomSettings::default(),
            events_tx,
        ));

        calls.start_break(&ctx).await;

        assert!(transport.dialed.lock().unwrap().is_empty());
        let event = events_rx.try_recv().unwrap();
        assert_eq!(
            event,
            crate::events::SessionEvent::Notification {
                message: "Microphone access was denied".into(),
                is_error: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_calls_are_answered_only_during_break() {
        let transport = Arc::new(MockTransport::default());
        let calls = CallController::new(transport.clone());
        let ctx = context();

        calls
            .handle_event(CallEvent::Incoming { from: "P1".into() })
            .await;
        assert!(transport.answered.lock().unwrap().is_empty());

        calls.start_break(&ctx).await;
        calls
            .handle_event(CallEvent::Incoming { from: "P9".into() })
            .await;
        assert_eq!(transport.answered.lock().unwrap().clone(), vec!["P9"]);
        assert!(calls.connected_peers().contains("P9"));
    }

    #[tokio::test(start_paused = true)]
    async fn end_break_hangs_up_every_call() {
        let transport = Arc::new(MockTransport::default());
        let calls = CallController::new(transport.clone());
        let ctx = context();

        calls.start_break(&ctx).await;
        calls.end_break().await;

        let mut hung_up = transport.hung_up.lock().unwrap().clone();
        hung_up.sort();
        assert_eq!(hung_up, vec!["P1".to_string(), "P2".to_string()]);
        assert!(calls.connected_peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_calls_can_be_redialed() {
        let transport = Arc::new(MockTransport::default());
        let calls = CallController::new(transport.clone());
        let ctx = context();

        calls.start_break(&ctx).await;
        calls
            .handle_event(CallEvent::Closed { peer: "P1".into() })
            .await;
        assert!(!calls.connected_peers().contains("P1"));

        tokio::time::advance(SWEEP_MIN_INTERVAL).await;
        transport.dialed.lock().unwrap().clear();
        calls.sweep(&ctx, false).await;
        assert_eq!(transport.dialed.lock().unwrap().clone(), vec!["P1"]);
    }
}
