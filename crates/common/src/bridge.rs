//! Network state bridge
//!
//! Maps mesh lifecycle notifications onto the generic coarse/detailed network
//! state and fans every distinct change out to connected subscriber channels.
//! The latest value is also published on a watch channel for consumers that
//! only care about the current state.
//!
//! Registry mutation and delivery share one lock, so a channel connected
//! during a publish either gets that change or it does not.

use crate::controller::MeshListener;
use crate::types::{CoarseState, DetailedState, MeshEvent, NetworkState};
use crate::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifies one subscriber channel
pub type ChannelId = Uuid;

/// Signal strength announced while the mesh is up
pub const MAX_SIGNAL_STRENGTH: i32 = 256;

/// Payload delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Coarse {
        state: CoarseState,
        previous: CoarseState,
    },
    Detailed {
        state: DetailedState,
        network: NetworkState,
    },
}

/// Outcome of a connection handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Successful,
    Failed(i32),
}

/// Why a channel went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    SendFailed,
    Other(i32),
}

/// Channel lifecycle message from a collaborator
#[derive(Debug)]
pub enum ChannelEvent {
    HalfConnected {
        status: ConnectStatus,
        channel: SubscriberChannel,
    },
    FullConnectionRequested {
        channel: SubscriberChannel,
    },
    Disconnected {
        id: ChannelId,
        reason: DisconnectReason,
    },
}

/// One connected consumer of state changes
#[derive(Debug, Clone)]
pub struct SubscriberChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<StateChange>,
}

impl SubscriberChannel {
    /// Create a channel and the receiver its consumer reads from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    fn deliver(&self, change: StateChange) -> bool {
        self.tx.send(change).is_ok()
    }
}

struct Registry {
    state: NetworkState,
    /// Insertion ordered
    subscribers: Vec<SubscriberChannel>,
}

/// Publishes the generic network state derived from mesh events
pub struct StateBridge {
    inner: Mutex<Registry>,
    latest: watch::Sender<NetworkState>,
    /// Sticky, never reset on disable
    signal: watch::Sender<Option<i32>>,
}

impl Default for StateBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBridge {
    /// Create a bridge in the disabled/disconnected state
    pub fn new() -> Self {
        let (latest, _) = watch::channel(NetworkState::default());
        let (signal, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Registry {
                state: NetworkState::default(),
                subscribers: Vec::new(),
            }),
            latest,
            signal,
        }
    }

    /// Latest published state
    pub fn current_state(&self) -> NetworkState {
        *self.latest.borrow()
    }

    /// Follow the latest published state
    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.latest.subscribe()
    }

    /// Last announced signal strength, if any
    pub fn signal_strength(&self) -> Option<i32> {
        *self.signal.borrow()
    }

    /// Follow announced signal strength
    pub fn watch_signal_strength(&self) -> watch::Receiver<Option<i32>> {
        self.signal.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Add a subscriber channel
    pub fn connect(&self, channel: SubscriberChannel) -> Result<()> {
        let mut registry = self.inner.lock();
        if registry.subscribers.iter().any(|c| c.id == channel.id) {
            return Err(Error::DuplicateChannel {
                id: channel.id.to_string(),
            });
        }

        debug!("New client listening to state changes: {}", channel.id);
        registry.subscribers.push(channel);
        Ok(())
    }

    /// Remove a subscriber channel; unknown ids are ignored
    pub fn disconnect(&self, id: ChannelId, reason: DisconnectReason) {
        let mut registry = self.inner.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|c| c.id != id);

        if registry.subscribers.len() != before {
            match reason {
                DisconnectReason::SendFailed => debug!("Send failed, client connection lost: {}", id),
                other => debug!("Client {} disconnected with reason {:?}", id, other),
            }
        }
    }

    /// Apply a channel lifecycle message
    pub fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::HalfConnected {
                status: ConnectStatus::Successful,
                channel,
            }
            | ChannelEvent::FullConnectionRequested { channel } => {
                if let Err(e) = self.connect(channel) {
                    warn!("Ignoring channel connection: {}", e);
                }
            }
            ChannelEvent::HalfConnected {
                status: ConnectStatus::Failed(code),
                channel,
            } => {
                error!("Client connection failure, error={} ({})", code, channel.id);
            }
            ChannelEvent::Disconnected { id, reason } => self.disconnect(id, reason),
        }
    }

    /// Publish a coarse state; returns whether it was delivered
    pub fn publish_coarse(&self, state: CoarseState) -> Result<bool> {
        let mut registry = self.inner.lock();
        let previous = registry.state.coarse;
        if previous == state {
            debug!("Coarse state already {}, not republishing", state);
            return Ok(false);
        }

        let next = NetworkState {
            coarse: state,
            ..registry.state
        };
        self.commit(&mut registry, next)?;

        info!("Network state {} -> {}", previous, state);
        deliver(&mut registry, StateChange::Coarse { state, previous });
        Ok(true)
    }

    /// Publish a detailed state; returns whether it was delivered
    pub fn publish_detailed(&self, state: DetailedState) -> Result<bool> {
        let mut registry = self.inner.lock();
        let previous = registry.state.detailed;
        if previous == state {
            debug!("Detailed state already {}, not republishing", state);
            return Ok(false);
        }

        let next = NetworkState {
            detailed: state,
            ..registry.state
        };
        self.commit(&mut registry, next)?;

        info!("Detailed network state {} -> {}", previous, state);
        deliver(
            &mut registry,
            StateChange::Detailed {
                state,
                network: next,
            },
        );
        Ok(true)
    }

    fn commit(&self, registry: &mut Registry, next: NetworkState) -> Result<()> {
        if !next.is_consistent() {
            return Err(Error::InvalidStateTransition {
                from: registry.state.to_string(),
                to: next.to_string(),
            });
        }
        registry.state = next;
        self.latest.send_replace(next);
        Ok(())
    }

    fn on_mesh_enabled(&self) -> Result<()> {
        self.publish_coarse(CoarseState::Enabled)?;
        self.publish_detailed(DetailedState::Connected)?;
        self.signal.send_replace(Some(MAX_SIGNAL_STRENGTH));
        Ok(())
    }

    fn on_mesh_disabled(&self) -> Result<()> {
        self.publish_detailed(DetailedState::Disconnected)?;
        self.publish_coarse(CoarseState::Disabled)?;
        Ok(())
    }
}

/// Deliver to every subscriber, dropping the ones whose consumer is gone
fn deliver(registry: &mut Registry, change: StateChange) {
    registry.subscribers.retain(|channel| {
        let delivered = channel.deliver(change);
        if !delivered {
            debug!("Send failed, client connection lost: {}", channel.id);
        }
        delivered
    });
}

impl MeshListener for StateBridge {
    fn on_event(&self, event: &MeshEvent) {
        let result = match event {
            MeshEvent::MeshEnabled => self.on_mesh_enabled(),
            MeshEvent::MeshDisabled => self.on_mesh_disabled(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to publish network state for {:?}: {}", event, e);
        }
    }
}
