use thiserror::Error;

/// Result alias used across the popup crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a popup operation or registry lookup can fail.
///
/// Rejections are shared between every awaiter of a coalesced operation, so the
/// error is `Clone` and carries owned strings rather than boxed sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// `open` was called while the popup was opened or already opening.
    #[error("popup not closed")]
    NotClosed,

    /// `close` was called while the popup was closed or already closing.
    #[error("popup not opened")]
    NotOpened,

    /// A `beforeopen` listener prevented the open.
    #[error("open prevented")]
    OpenPrevented,

    /// A `beforeclose` listener prevented the close.
    #[error("close prevented")]
    ClosePrevented,

    /// An in-flight open was pre-empted by a close.
    #[error("open cancelled")]
    OpenCancelled,

    /// An in-flight close was pre-empted by an open.
    #[error("close cancelled")]
    CloseCancelled,

    /// The host failed to mount a popup or its content.
    #[error("mount failed: {0}")]
    Mount(String),

    /// Every producer of a pending deferred was dropped.
    #[error("deferred abandoned before settling")]
    Abandoned,

    /// A `then`/`catch` continuation failed.
    #[error("continuation failed: {0}")]
    Callback(String),

    /// A group with this id is already registered.
    #[error("duplicate manager id: {0}")]
    DuplicateGroup(String),

    /// No group is registered under this id.
    #[error("invalid manager id: {0}")]
    UnknownGroup(String),

    /// Default routing was requested but no group is registered.
    #[error("no popup manager registered")]
    NoGroup,
}

impl Error {
    /// Wrap a host failure, keeping the whole context chain in the message.
    pub fn mount(err: &anyhow::Error) -> Self {
        Self::Mount(format!("{err:#}"))
    }

    /// True for rejections caused by the opposite operation pre-empting this one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::OpenCancelled | Self::CloseCancelled)
    }

    /// True for rejections caused by a listener vetoing the transition.
    pub fn is_prevented(&self) -> bool {
        matches!(self, Self::OpenPrevented | Self::ClosePrevented)
    }
}
