use crate::profile::{
    DeciderRule, EffectiveProfile, ObserverRule, PromptSegment, RawProfile, ToolAccessPolicy,
};
use quorum_core::{QuorumError, QuorumResult};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Immutable-after-boot store of raw profiles with memoized resolution.
pub struct ProfileStore {
    raw: HashMap<String, RawProfile>,
    resolved: RwLock<HashMap<String, Arc<EffectiveProfile>>>,
}

impl ProfileStore {
    pub fn from_raw(profiles: impl IntoIterator<Item = RawProfile>) -> Self {
        Self {
            raw: profiles.into_iter().map(|p| (p.name.clone(), p)).collect(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every profile file under `dir` (see [`crate::loader::load_all`]).
    pub fn load_all(dir: impl AsRef<Path>) -> QuorumResult<Self> {
        Ok(Self {
            raw: crate::loader::load_all(dir)?,
            resolved: RwLock::new(HashMap::new()),
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.raw.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of raw profiles declared `type = "associate"` (after resolving
    /// each chain), used to seed `team.profiles_list_instance_ids`.
    pub fn associate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .raw
            .keys()
            .filter(|name| {
                self.resolve(name)
                    .map(|p| p.profile_type == crate::profile::ProfileType::Associate)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolves `name` through its `base_profile` chain into an effective
    /// profile. Memoized; repeated resolution yields the identical value.
    pub fn resolve(&self, name: &str) -> QuorumResult<Arc<EffectiveProfile>> {
        if let Some(hit) = self
            .resolved
            .read()
            .ok()
            .and_then(|memo| memo.get(name).cloned())
        {
            return Ok(hit);
        }

        let chain = self.chain_for(name)?;
        let effective = Arc::new(merge_chain(&chain)?);
        if let Ok(mut memo) = self.resolved.write() {
            memo.insert(name.to_string(), effective.clone());
        }
        debug!(profile = name, base_depth = chain.len() - 1, "Resolved profile");
        Ok(effective)
    }

    /// Walks the inheritance chain leaf-first, detecting cycles.
    fn chain_for(&self, name: &str) -> QuorumResult<Vec<&RawProfile>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());
        while let Some(profile_name) = current {
            if !seen.insert(profile_name.clone()) {
                return Err(QuorumError::ProfileCycle(format!(
                    "{name} -> ... -> {profile_name}"
                )));
            }
            let raw = self
                .raw
                .get(&profile_name)
                .ok_or_else(|| QuorumError::ProfileNotFound(profile_name.clone()))?;
            chain.push(raw);
            current = raw.base_profile.clone();
        }
        Ok(chain)
    }
}

/// Merges a leaf-first chain into one effective profile: root first, each
/// child layered on top with child-wins semantics.
fn merge_chain(chain: &[&RawProfile]) -> QuorumResult<EffectiveProfile> {
    let leaf = chain.first().ok_or_else(|| {
        QuorumError::Engine("profile chain cannot be empty".into())
    })?;

    let mut profile_type = None;
    let mut description_for_human = None;
    let mut llm_config_ref = None;
    let mut policy = ToolAccessPolicy::default();
    let mut segments: Vec<PromptSegment> = Vec::new();
    let mut text_definitions = std::collections::BTreeMap::new();
    let mut pre_turn: Vec<ObserverRule> = Vec::new();
    let mut post_turn: Vec<ObserverRule> = Vec::new();
    let mut decider: Vec<DeciderRule> = Vec::new();

    for raw in chain.iter().rev() {
        if let Some(t) = raw.profile_type {
            profile_type = Some(t);
        }
        if let Some(d) = &raw.description_for_human {
            description_for_human = Some(d.clone());
        }
        if let Some(r) = &raw.llm_config_ref {
            llm_config_ref = Some(r.clone());
        }
        if let Some(p) = &raw.tool_access_policy {
            union_into(&mut policy.allowed_toolsets, &p.allowed_toolsets);
            union_into(&mut policy.allowed_individual_tools, &p.allowed_individual_tools);
        }
        merge_by_id(
            &mut segments,
            &raw.system_prompt_construction.system_prompt_segments,
            |s| s.id.clone(),
        );
        for (key, value) in &raw.text_definitions {
            text_definitions.insert(key.clone(), value.clone());
        }
        merge_by_id(&mut pre_turn, &raw.pre_turn_observers, |o| o.id.clone());
        merge_by_id(&mut post_turn, &raw.post_turn_observers, |o| o.id.clone());
        merge_by_id(&mut decider, &raw.flow_decider, |d| d.id.clone());
    }

    let profile_type = profile_type.ok_or_else(|| {
        QuorumError::Config(format!("profile '{}' resolves without a type", leaf.name))
    })?;

    segments.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    Ok(EffectiveProfile {
        name: leaf.name.clone(),
        profile_type,
        description_for_human,
        llm_config_ref: llm_config_ref.unwrap_or_else(|| "default".to_string()),
        tool_access_policy: policy,
        segments,
        text_definitions,
        pre_turn_observers: pre_turn,
        post_turn_observers: post_turn,
        flow_decider: decider,
    })
}

/// Replaces items with matching ids in place (child wins, parent position
/// kept) and appends genuinely new items in child order.
fn merge_by_id<T: Clone>(base: &mut Vec<T>, overlay: &[T], id_of: impl Fn(&T) -> String) {
    for item in overlay {
        let id = id_of(item);
        match base.iter_mut().find(|existing| id_of(existing) == id) {
            Some(slot) => *slot = item.clone(),
            None => base.push(item.clone()),
        }
    }
}

fn union_into(base: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !base.contains(item) {
            base.push(item.clone());
        }
    }
}
