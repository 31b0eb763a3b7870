//! Declarative agent profiles for the quorum runtime.
//!
//! A profile describes everything about an agent except its code: which
//! tools it sees, how its system prompt is assembled, the observer rules
//! that run around each turn, and the flow decider that picks the next
//! action. Profiles inherit through `base_profile` chains resolved with
//! child-wins-by-id merge semantics.
//!
//! # Main types
//!
//! - [`RawProfile`] — a profile as authored (TOML on disk or built-in).
//! - [`EffectiveProfile`] — the immutable result of resolving a chain.
//! - [`ProfileStore`] — loads, resolves, and memoizes profiles.

/// Shipped default profiles.
pub mod defaults;
/// TOML profile file loading.
pub mod loader;
/// Profile data model.
pub mod profile;
/// Inheritance resolution.
pub mod resolver;

pub use defaults::default_profiles;
pub use profile::{
    DeciderAction, DeciderRule, EffectiveProfile, InboxSpec, ObserverAction, ObserverRule,
    ProfileType, PromptSegment, RawProfile, RuleOutcome, SegmentKind, SystemPromptConstruction,
    ToolAccessPolicy,
};
pub use resolver::ProfileStore;
