/// Readiness directions an fd is registered for.
///
/// Fds are admitted with both directions armed, so a later wait in
/// either direction never depends on re-arming the registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const BOTH: Interest = Interest {
        read: true,
        write: true,
    };
}
