//! Cross-context sync: keeps sibling contexts sharing one storage key
//! informed of each other's mutations.

mod channel;
mod coordinator;
mod protocol;

pub use channel::{
    select_method, BroadcastChannel, BroadcastHub, Capabilities, NotificationChannel, Platform,
    StorageEvent, StorageEventBus, StorageEventChannel, SyncMethod,
};
pub use coordinator::{
    ClearCallback, CrossContextCoordinator, CrossContextHandlers, RemoveCallback, UpdateCallback,
};
pub use protocol::{ChangeKind, ChangeNotification};
