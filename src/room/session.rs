//! Room membership lifecycle: create, join, resume, leave.
//!
//! A [`RoomSession`] is the owning handle for one membership. All recurring
//! work runs in tasks tied to the session's cancellation token; an explicit
//! leave (or a room deletion observed from the store) tears everything down
//! as a unit.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::accounting::{accumulator_loop, AccountIdentity, WorkLedger};
use crate::call::{call_events_loop, CallController};
use crate::config::RoomSettings;
use crate::error::SessionError;
use crate::events::{notify, EventReceiver, ParticipantInfo};
use crate::ids;
use crate::peer::AudioTransport;
use crate::reconnect::{ReconnectRecord, ReconnectStore};
use crate::room::model::{participant_path, room_path, settings_path, timer_path};
use crate::room::{replication, RoomContext, TimerView};
use crate::store::{coerce, SharedStore, StoreEvent, WatchKind, CONNECTED_PATH};
use crate::timer::{host, TimerSnapshot};

/// Bounded wait for the store's connected signal at startup.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry point: a configured client that can create, join or resume rooms.
pub struct FocusClient {
    store: Arc<dyn SharedStore>,
    transport: Arc<dyn AudioTransport>,
    reconnect: ReconnectStore,
}

impl FocusClient {
    /// Waits for the store connection to come up, within `timeout`. A store
    /// that never connects is a hard startup failure; there is no retry
    /// loop beyond this bounded wait.
    pub async fn connect(
        store: Arc<dyn SharedStore>,
        transport: Arc<dyn AudioTransport>,
        reconnect_path: PathBuf,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut watch = store.watch(CONNECTED_PATH, WatchKind::Value);
        let connected = tokio::time::timeout(timeout, async {
            while let Some(event) = watch.next().await {
                if let StoreEvent::Value(value) = event {
                    if coerce::bool_or(value.as_ref(), false) {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        if !connected {
            return Err(SessionError::ConnectTimeout(timeout));
        }
        Ok(Self {
            store,
            transport,
            reconnect: ReconnectStore::new(reconnect_path),
        })
    }

    pub async fn create_room(
        &self,
        nickname: &str,
        settings: RoomSettings,
    ) -> Result<RoomSession, SessionError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(SessionError::EmptyNickname);
        }
        if !settings.is_valid() {
            return Err(SessionError::InvalidSettings);
        }
        initialize_room(
            self,
            JoinArgs {
                room_id: ids::room_id(),
                peer_id: ids::peer_id(),
                nickname: nickname.to_string(),
                is_host: true,
                settings,
                fresh_room: true,
            },
        )
        .await
    }

    pub async fn join_room(
        &self,
        nickname: &str,
        room_id: &str,
    ) -> Result<RoomSession, SessionError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(SessionError::EmptyNickname);
        }
        let room_id = room_id.trim().to_ascii_uppercase();
        if room_id.is_empty() {
            return Err(SessionError::EmptyRoomId);
        }
        if self.store.get(&room_path(&room_id)).await?.is_none() {
            return Err(SessionError::RoomNotFound(room_id));
        }
        initialize_room(
            self,
            JoinArgs {
                room_id,
                peer_id: ids::peer_id(),
                nickname: nickname.to_string(),
                is_host: false,
                settings: RoomSettings::default(),
                fresh_room: false,
            },
        )
        .await
    }

    /// Automatic rejoin after a restart. `room_hint` is the room referenced
    /// by the environment (the `?room=` URL parameter equivalent); the
    /// saved record is only used when it matches.
    ///
    /// A saved host claim is honored only while the store still shows the
    /// old peer identity as host; anyone else having taken the seat demotes
    /// the rejoin to a plain participant, silently.
    pub async fn resume(
        &self,
        room_hint: Option<&str>,
    ) -> Result<Option<RoomSession>, SessionError> {
        let Some(record) = self.reconnect.load() else {
            return Ok(None);
        };
        let Some(hint) = room_hint else {
            return Ok(None);
        };
        if !hint.trim().eq_ignore_ascii_case(&record.room_id) {
            return Ok(None);
        }

        let Some(room) = self.store.get(&room_path(&record.room_id)).await? else {
            info!("room {} is gone, dropping the reconnect record", record.room_id);
            self.reconnect.clear();
            return Ok(None);
        };

        let peer_id = ids::peer_id();
        let stored_host = coerce::str_field(Some(&room), "hostId", "");
        let is_host = record.is_host && stored_host == record.peer_id;
        if record.is_host && !is_host {
            info!("host seat was taken over, rejoining as participant");
        }
        if is_host {
            // reclaim the seat under the fresh identity
            self.store
                .update(
                    &room_path(&record.room_id),
                    json!({ "hostId": peer_id.clone() }),
                )
                .await?;
        }

        let session = initialize_room(
            self,
            JoinArgs {
                room_id: record.room_id.clone(),
                peer_id,
                nickname: record.nickname.clone(),
                is_host,
                settings: RoomSettings::default(),
                fresh_room: false,
            },
        )
        .await?;
        Ok(Some(session))
    }
}

struct JoinArgs {
    room_id: String,
    peer_id: String,
    nickname: String,
    is_host: bool,
    settings: RoomSettings,
    fresh_room: bool,
}

/// The one initialization path: fresh create, manual join and automatic
/// resume all come through here.
async fn initialize_room(
    client: &FocusClient,
    args: JoinArgs,
) -> Result<RoomSession, SessionError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(RoomContext::new(
        client.store.clone(),
        args.room_id,
        args.peer_id,
        args.nickname,
        args.is_host,
        args.settings,
        events_tx,
    ));

    if args.fresh_room {
        let now = ctx.store.now_ms();
        let snapshot = TimerSnapshot::initial(&ctx.settings(), now);
        ctx.store
            .set(
                &room_path(&ctx.room_id),
                json!({
                    "createdAt": now,
                    "hostId": ctx.peer_id.clone(),
                    "timer": snapshot.to_value(),
                    "settings": ctx.settings().to_value(),
                }),
            )
            .await?;
    } else {
        // adopt the room's configuration and current countdown
        let settings =
            RoomSettings::from_value(ctx.store.get(&settings_path(&ctx.room_id)).await?.as_ref());
        *ctx.settings.lock().unwrap() = settings;
        if let Some(snapshot) =
            TimerSnapshot::from_value(ctx.store.get(&timer_path(&ctx.room_id)).await?.as_ref())
        {
            *ctx.timer.lock().unwrap() = TimerView::from_snapshot(&snapshot, Instant::now());
        }
    }

    let presence_path = participant_path(&ctx.room_id, &ctx.peer_id);
    ctx.store.set(&presence_path, ctx.participant_value()).await?;
    ctx.store.on_disconnect_remove(&presence_path).await?;

    if let Err(err) = client.transport.open(&ctx.peer_id).await {
        warn!("audio transport open failed: {err}");
        notify(&ctx.events, "Voice transport unavailable", true);
    }

    let ledger = Arc::new(WorkLedger::new(client.store.clone(), ctx.room_id.clone()));
    let calls = Arc::new(CallController::new(client.transport.clone()));
    let teardown = Teardown {
        ctx: ctx.clone(),
        ledger: ledger.clone(),
        calls: calls.clone(),
        reconnect: client.reconnect.clone(),
    };

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(replication::timer_watch_loop(
        ctx.clone(),
        ledger.clone(),
        calls.clone(),
    )));
    tasks.push(tokio::spawn(replication::participants_watch_loop(
        ctx.clone(),
        calls.clone(),
    )));
    tasks.push(tokio::spawn(replication::room_watch_loop(
        ctx.clone(),
        teardown.clone(),
    )));
    tasks.push(tokio::spawn(replication::heartbeat_loop(ctx.clone())));
    tasks.push(tokio::spawn(replication::display_loop(ctx.clone())));
    tasks.push(tokio::spawn(accumulator_loop(ctx.clone(), ledger.clone())));
    tasks.push(tokio::spawn(call_events_loop(ctx.clone(), calls.clone())));
    if ctx.is_host {
        tasks.push(tokio::spawn(host::host_timer_loop(
            ctx.clone(),
            ledger.clone(),
            calls.clone(),
        )));
    }

    client.reconnect.save(&ReconnectRecord {
        room_id: ctx.room_id.clone(),
        nickname: ctx.nickname.clone(),
        is_host: ctx.is_host,
        peer_id: ctx.peer_id.clone(),
        updated_at: ctx.store.now_ms(),
    });

    notify(
        &ctx.events,
        if ctx.is_host {
            format!("Room {} is ready", ctx.room_id)
        } else {
            format!("Joined room {}", ctx.room_id)
        },
        false,
    );

    Ok(RoomSession {
        ctx,
        ledger,
        calls,
        teardown,
        events: Some(events_rx),
        tasks,
    })
}

/// Shared teardown path for explicit leaves and forced ones (room deleted).
/// Runs once; later invocations are no-ops.
#[derive(Clone)]
pub struct Teardown {
    ctx: Arc<RoomContext>,
    ledger: Arc<WorkLedger>,
    calls: Arc<CallController>,
    reconnect: ReconnectStore,
}

impl Teardown {
    pub(crate) async fn run(&self, explicit_leave: bool) {
        if self.ctx.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let account = self.ctx.account();
        self.ledger
            .finalize_session(account.as_ref(), self.ctx.store.now_ms())
            .await;
        self.calls.shutdown().await;
        let _ = self
            .ctx
            .store
            .remove(&participant_path(&self.ctx.room_id, &self.ctx.peer_id))
            .await;
        if explicit_leave {
            if self.ctx.is_host {
                // the host owns the room lifecycle
                let _ = self.ctx.store.remove(&room_path(&self.ctx.room_id)).await;
            }
            self.reconnect.clear();
        }
        self.ctx.cancel.cancel();
    }
}

/// Point-in-time view of the countdown, derived from the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerReadout {
    pub remaining_seconds: u32,
    pub is_break: bool,
    pub is_paused: bool,
    pub current_cycle: u8,
}

pub struct RoomSession {
    ctx: Arc<RoomContext>,
    ledger: Arc<WorkLedger>,
    calls: Arc<CallController>,
    teardown: Teardown,
    events: Option<EventReceiver>,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomSession {
    pub fn room_id(&self) -> &str {
        &self.ctx.room_id
    }

    pub fn peer_id(&self) -> &str {
        &self.ctx.peer_id
    }

    pub fn is_host(&self) -> bool {
        self.ctx.is_host
    }

    pub fn settings(&self) -> RoomSettings {
        self.ctx.settings()
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.closed.load(Ordering::SeqCst)
    }

    /// Hands out the event stream; only the first call yields it.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    pub fn timer(&self) -> TimerReadout {
        let timer = self.ctx.timer.lock().unwrap();
        TimerReadout {
            remaining_seconds: timer.anchor.remaining_at(Instant::now()),
            is_break: timer.is_break,
            is_paused: timer.is_paused,
            current_cycle: timer.current_cycle,
        }
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.ctx.roster_infos()
    }

    /// Host control: pause or resume the shared countdown.
    pub async fn toggle_pause(&self) -> Result<bool, SessionError> {
        if !self.ctx.is_host {
            return Err(SessionError::NotHost);
        }
        let paused = !self.ctx.timer.lock().unwrap().is_paused;
        host::set_paused(&self.ctx, &self.ledger, paused).await;
        Ok(paused)
    }

    /// Host control: end the current phase now. Skipping away from an
    /// in-progress work phase credits the entire configured duration.
    pub async fn skip_phase(&self) -> Result<(), SessionError> {
        if !self.ctx.is_host {
            return Err(SessionError::NotHost);
        }
        let full_credit = !self.ctx.timer.lock().unwrap().is_break;
        host::switch_phase(&self.ctx, &self.ledger, &self.calls, full_credit).await;
        Ok(())
    }

    /// Host control: change phase durations. The running phase restarts at
    /// the new full duration.
    pub async fn update_settings(&self, settings: RoomSettings) -> Result<(), SessionError> {
        if !self.ctx.is_host {
            return Err(SessionError::NotHost);
        }
        if !settings.is_valid() {
            return Err(SessionError::InvalidSettings);
        }
        self.ctx
            .store
            .update(&settings_path(&self.ctx.room_id), settings.to_value())
            .await?;
        *self.ctx.settings.lock().unwrap() = settings;
        {
            let mut timer = self.ctx.timer.lock().unwrap();
            timer.remaining_seconds = settings.phase_seconds(timer.is_break);
            let paused = timer.is_paused;
            let remaining = timer.remaining_seconds;
            timer.anchor.reset(remaining, paused, Instant::now());
        }
        host::publish_timer(&self.ctx).await;
        Ok(())
    }

    /// Updates the local free-text task label, closing the running segment
    /// under the old label.
    pub async fn set_task_label(&self, label: Option<String>) {
        let label = label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self.ctx.set_task_label(label.clone());
        let account = self.ctx.account();
        self.ledger
            .set_task_label(label.clone(), account.as_ref(), self.ctx.store.now_ms())
            .await;

        let path = participant_path(&self.ctx.room_id, &self.ctx.peer_id);
        let patch = json!({ "task": label.map(Value::from).unwrap_or(Value::Null) });
        if let Err(err) = self.ctx.store.update(&path, patch).await {
            warn!("task label update failed ({err}), re-issuing presence record");
            let _ = self
                .ctx
                .store
                .set(&path, self.ctx.participant_value())
                .await;
        }
    }

    /// Attaches the authenticated account; accounting starts at the next
    /// accumulator tick if the phase allows it.
    pub async fn sign_in(&self, account: AccountIdentity) {
        self.ctx.set_account(Some(account));
        let path = participant_path(&self.ctx.room_id, &self.ctx.peer_id);
        let _ = self.ctx.store.set(&path, self.ctx.participant_value()).await;
    }

    /// Detaches the account. The engagement span finalizes now: forced
    /// flush, closed segment, one session-log entry.
    pub async fn sign_out(&self) {
        let account = self.ctx.account();
        self.ledger
            .finalize_session(account.as_ref(), self.ctx.store.now_ms())
            .await;
        self.ctx.set_account(None);
        let path = participant_path(&self.ctx.room_id, &self.ctx.peer_id);
        let patch = json!({ "accountUid": Value::Null, "displayName": Value::Null });
        let _ = self.ctx.store.update(&path, patch).await;
    }

    pub fn toggle_mute(&self) -> bool {
        self.calls.toggle_mute()
    }

    /// Intentional leave: settle accounting, drop presence, and (for the
    /// host) delete the room, forcing everyone else out.
    pub async fn leave(mut self) {
        self.teardown.run(true).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // a dropped handle is an unclean exit: stop local work, leave the
        // store cleanup to the disconnect hook
        self.ctx.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}
