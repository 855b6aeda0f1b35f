//! Record lifecycle state machine
//!
//! ## States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `root.empty` | identity known, no data |
//! | `root.loading` | fetch in progress |
//! | `root.loaded.saved` | clean, matches server |
//! | `root.loaded.updated.*` | persisted record with local edits |
//! | `root.loaded.created.*` | never persisted |
//! | `root.deleted.*` | deletion requested or confirmed |
//!
//! `uncommitted -> inFlight` on save; `inFlight -> invalid` on validation
//! failure, `inFlight -> uncommitted` on any other failure. Every state other
//! than `inFlight` accepts `Unload`; the store defers unloads of in-flight
//! records until the pending request settles.

use serde::{Deserialize, Serialize};
use tessera_core::{Error, Result};

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecordState {
    /// `root.empty`
    #[default]
    Empty,
    /// `root.loading`
    Loading,
    /// `root.loaded.saved`
    LoadedSaved,
    /// `root.loaded.updated.uncommitted`
    UpdatedUncommitted,
    /// `root.loaded.updated.invalid`
    UpdatedInvalid,
    /// `root.loaded.updated.inFlight`
    UpdatedInFlight,
    /// `root.loaded.created.uncommitted`
    CreatedUncommitted,
    /// `root.loaded.created.invalid`
    CreatedInvalid,
    /// `root.loaded.created.inFlight`
    CreatedInFlight,
    /// `root.deleted.uncommitted`
    DeletedUncommitted,
    /// `root.deleted.invalid`
    DeletedInvalid,
    /// `root.deleted.inFlight`
    DeletedInFlight,
    /// `root.deleted.saved`
    DeletedSaved,
}

/// Input accepted by [`RecordState::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    /// A find-by-id request started
    LoadingData,
    /// Canonical data arrived (push or fetch response)
    PushedData,
    /// Fetch resolved with no usable data
    NotFound,
    /// Fetch rejected
    LoadingFailed,
    /// Record created locally
    Created,
    /// Local attribute or relationship edit
    BecomeDirty,
    /// Local edits no longer differ from canonical state
    PropertyWasReset,
    /// The last validation error was cleared
    BecameValid,
    /// Local delete request
    DeleteRecord,
    /// Save started
    WillCommit,
    /// Save succeeded; `dirty` is true if edits were made during the flight
    DidCommit {
        /// Local edits arrived while the request was in flight
        dirty: bool,
    },
    /// Save rejected with validation errors
    BecameInvalid,
    /// Save rejected for any other reason
    BecameError,
    /// Local edits discarded
    RolledBack,
    /// Record dematerialized
    Unload,
}

impl RecordEvent {
    /// Event name used in error messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordEvent::LoadingData => "loadingData",
            RecordEvent::PushedData => "pushedData",
            RecordEvent::NotFound => "notFound",
            RecordEvent::LoadingFailed => "loadingFailed",
            RecordEvent::Created => "loadedData",
            RecordEvent::BecomeDirty => "becomeDirty",
            RecordEvent::PropertyWasReset => "propertyWasReset",
            RecordEvent::BecameValid => "becameValid",
            RecordEvent::DeleteRecord => "deleteRecord",
            RecordEvent::WillCommit => "willCommit",
            RecordEvent::DidCommit { .. } => "didCommit",
            RecordEvent::BecameInvalid => "becameInvalid",
            RecordEvent::BecameError => "becameError",
            RecordEvent::RolledBack => "rolledBack",
            RecordEvent::Unload => "unloadRecord",
        }
    }
}

impl RecordState {
    /// Dot path of this state
    pub fn path(&self) -> &'static str {
        match self {
            RecordState::Empty => "root.empty",
            RecordState::Loading => "root.loading",
            RecordState::LoadedSaved => "root.loaded.saved",
            RecordState::UpdatedUncommitted => "root.loaded.updated.uncommitted",
            RecordState::UpdatedInvalid => "root.loaded.updated.invalid",
            RecordState::UpdatedInFlight => "root.loaded.updated.inFlight",
            RecordState::CreatedUncommitted => "root.loaded.created.uncommitted",
            RecordState::CreatedInvalid => "root.loaded.created.invalid",
            RecordState::CreatedInFlight => "root.loaded.created.inFlight",
            RecordState::DeletedUncommitted => "root.deleted.uncommitted",
            RecordState::DeletedInvalid => "root.deleted.invalid",
            RecordState::DeletedInFlight => "root.deleted.inFlight",
            RecordState::DeletedSaved => "root.deleted.saved",
        }
    }

    /// `root.empty`
    pub fn is_empty(&self) -> bool {
        matches!(self, RecordState::Empty)
    }

    /// `root.loading`
    pub fn is_loading(&self) -> bool {
        matches!(self, RecordState::Loading)
    }

    /// Any `root.loaded.*` or `root.deleted.*` state
    pub fn is_loaded(&self) -> bool {
        !matches!(self, RecordState::Empty | RecordState::Loading)
    }

    /// Has local changes not yet confirmed by the server
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            RecordState::UpdatedUncommitted
                | RecordState::UpdatedInvalid
                | RecordState::UpdatedInFlight
                | RecordState::CreatedUncommitted
                | RecordState::CreatedInvalid
                | RecordState::CreatedInFlight
                | RecordState::DeletedUncommitted
                | RecordState::DeletedInvalid
                | RecordState::DeletedInFlight
        )
    }

    /// Never persisted
    pub fn is_new(&self) -> bool {
        matches!(
            self,
            RecordState::CreatedUncommitted
                | RecordState::CreatedInvalid
                | RecordState::CreatedInFlight
        )
    }

    /// Any `root.deleted.*` state
    pub fn is_deleted(&self) -> bool {
        matches!(
            self,
            RecordState::DeletedUncommitted
                | RecordState::DeletedInvalid
                | RecordState::DeletedInFlight
                | RecordState::DeletedSaved
        )
    }

    /// Any `*.inFlight` state
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            RecordState::UpdatedInFlight | RecordState::CreatedInFlight | RecordState::DeletedInFlight
        )
    }

    /// Not in an `*.invalid` state
    pub fn is_valid(&self) -> bool {
        !matches!(
            self,
            RecordState::UpdatedInvalid | RecordState::CreatedInvalid | RecordState::DeletedInvalid
        )
    }

    /// Apply an event, returning the next state
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the current state does not handle `event`.
    pub fn transition(self, event: RecordEvent) -> Result<RecordState> {
        use RecordEvent as E;
        use RecordState as S;

        let next = match (self, event) {
            // root.empty
            (S::Empty, E::LoadingData) => S::Loading,
            (S::Empty, E::PushedData) => S::LoadedSaved,
            (S::Empty, E::Created) => S::CreatedUncommitted,
            (S::Empty, E::Unload) => S::Empty,

            // root.loading
            (S::Loading, E::LoadingData) => S::Loading,
            (S::Loading, E::PushedData) => S::LoadedSaved,
            (S::Loading, E::NotFound | E::LoadingFailed | E::Unload) => S::Empty,

            // root.loaded.saved
            (S::LoadedSaved, E::LoadingData | E::PushedData) => S::LoadedSaved,
            (S::LoadedSaved, E::PropertyWasReset | E::RolledBack) => S::LoadedSaved,
            (S::LoadedSaved, E::BecomeDirty) => S::UpdatedUncommitted,
            (S::LoadedSaved, E::DeleteRecord) => S::DeletedUncommitted,
            (S::LoadedSaved, E::WillCommit) => S::UpdatedInFlight,
            (S::LoadedSaved, E::Unload) => S::Empty,

            // root.loaded.updated.uncommitted
            (S::UpdatedUncommitted, E::LoadingData | E::PushedData | E::BecomeDirty) => {
                S::UpdatedUncommitted
            }
            (S::UpdatedUncommitted, E::PropertyWasReset | E::RolledBack) => S::LoadedSaved,
            (S::UpdatedUncommitted, E::DeleteRecord) => S::DeletedUncommitted,
            (S::UpdatedUncommitted, E::WillCommit) => S::UpdatedInFlight,
            (S::UpdatedUncommitted, E::Unload) => S::Empty,

            // root.loaded.updated.inFlight
            (S::UpdatedInFlight, E::PushedData | E::BecomeDirty | E::PropertyWasReset) => {
                S::UpdatedInFlight
            }
            (S::UpdatedInFlight, E::DidCommit { dirty: false }) => S::LoadedSaved,
            (S::UpdatedInFlight, E::DidCommit { dirty: true }) => S::UpdatedUncommitted,
            (S::UpdatedInFlight, E::BecameInvalid) => S::UpdatedInvalid,
            (S::UpdatedInFlight, E::BecameError) => S::UpdatedUncommitted,

            // root.loaded.updated.invalid
            (S::UpdatedInvalid, E::PushedData | E::BecomeDirty | E::PropertyWasReset) => {
                S::UpdatedInvalid
            }
            (S::UpdatedInvalid, E::BecameValid) => S::UpdatedUncommitted,
            (S::UpdatedInvalid, E::DeleteRecord) => S::DeletedUncommitted,
            (S::UpdatedInvalid, E::WillCommit) => S::UpdatedInFlight,
            (S::UpdatedInvalid, E::RolledBack) => S::LoadedSaved,
            (S::UpdatedInvalid, E::Unload) => S::Empty,

            // root.loaded.created.uncommitted
            (S::CreatedUncommitted, E::PushedData | E::BecomeDirty | E::PropertyWasReset) => {
                S::CreatedUncommitted
            }
            (S::CreatedUncommitted, E::WillCommit) => S::CreatedInFlight,
            (S::CreatedUncommitted, E::DeleteRecord | E::RolledBack | E::Unload) => S::Empty,

            // root.loaded.created.inFlight
            (S::CreatedInFlight, E::PushedData | E::BecomeDirty | E::PropertyWasReset) => {
                S::CreatedInFlight
            }
            (S::CreatedInFlight, E::DidCommit { dirty: false }) => S::LoadedSaved,
            (S::CreatedInFlight, E::DidCommit { dirty: true }) => S::UpdatedUncommitted,
            (S::CreatedInFlight, E::BecameInvalid) => S::CreatedInvalid,
            (S::CreatedInFlight, E::BecameError) => S::CreatedUncommitted,

            // root.loaded.created.invalid
            (S::CreatedInvalid, E::PushedData | E::BecomeDirty | E::PropertyWasReset) => {
                S::CreatedInvalid
            }
            (S::CreatedInvalid, E::BecameValid) => S::CreatedUncommitted,
            (S::CreatedInvalid, E::WillCommit) => S::CreatedInFlight,
            (S::CreatedInvalid, E::DeleteRecord | E::RolledBack | E::Unload) => S::Empty,

            // root.deleted.uncommitted
            (S::DeletedUncommitted, E::PushedData | E::DeleteRecord) => S::DeletedUncommitted,
            (S::DeletedUncommitted, E::WillCommit) => S::DeletedInFlight,
            (S::DeletedUncommitted, E::RolledBack) => S::LoadedSaved,
            (S::DeletedUncommitted, E::Unload) => S::Empty,

            // root.deleted.inFlight
            (S::DeletedInFlight, E::PushedData) => S::DeletedInFlight,
            (S::DeletedInFlight, E::DidCommit { .. }) => S::DeletedSaved,
            (S::DeletedInFlight, E::BecameInvalid) => S::DeletedInvalid,
            (S::DeletedInFlight, E::BecameError) => S::DeletedUncommitted,

            // root.deleted.invalid
            (S::DeletedInvalid, E::PushedData | E::DeleteRecord) => S::DeletedInvalid,
            (S::DeletedInvalid, E::BecameValid) => S::DeletedUncommitted,
            (S::DeletedInvalid, E::WillCommit) => S::DeletedInFlight,
            (S::DeletedInvalid, E::RolledBack) => S::LoadedSaved,
            (S::DeletedInvalid, E::Unload) => S::Empty,

            // root.deleted.saved
            (S::DeletedSaved, E::PushedData | E::DeleteRecord) => S::DeletedSaved,
            (S::DeletedSaved, E::Unload) => S::Empty,

            (state, event) => return Err(Error::transition(state.path(), event.as_str())),
        };
        Ok(next)
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}
