//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Account instances only receive their identifier once persisted, hence
/// the optional return.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier, if one has been assigned.
    fn id(&self) -> Option<Self::Id>;

    /// Whether the entity has been written to storage.
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
