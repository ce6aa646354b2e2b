// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool policy resolution.
//!
//! The effective policy for a job is the merge of the channel default, every
//! enabled skill's fragment, the agent's fragment and every enabled plugin's
//! fragment. Allow and deny sets are unioned; deny wins.

use corvid_config::model::PluginConfig;
use corvid_core::types::{AgentProfile, Skill};
use corvid_core::{Channel, ToolPolicy};

use crate::builtin::{CALCULATE, GET_CURRENT_TIME, MEMORY_SEARCH, MEMORY_STORE, SEND_MESSAGE};
use crate::tool::ToolRegistry;

/// The baseline policy for a channel.
pub fn default_policy(channel: Channel) -> ToolPolicy {
    match channel {
        Channel::Web => ToolPolicy::new(
            [GET_CURRENT_TIME, CALCULATE, SEND_MESSAGE, MEMORY_SEARCH, MEMORY_STORE],
            Vec::<&str>::new(),
        ),
        Channel::WhatsApp => ToolPolicy::new(
            [GET_CURRENT_TIME, CALCULATE, MEMORY_SEARCH, MEMORY_STORE],
            [SEND_MESSAGE],
        ),
    }
}

/// Unions all fragments, left to right.
pub fn merge_policies<'a, I>(fragments: I) -> ToolPolicy
where
    I: IntoIterator<Item = &'a ToolPolicy>,
{
    fragments
        .into_iter()
        .fold(ToolPolicy::default(), |mut merged, fragment| {
            merged.absorb(fragment);
            merged
        })
}

/// Keeps only the tools `policy` admits.
pub fn filter_tools(registry: &ToolRegistry, policy: &ToolPolicy) -> ToolRegistry {
    let mut filtered = ToolRegistry::new();
    for tool in registry.iter().filter(|t| policy.admits(t.name())) {
        filtered.replace(tool.clone());
    }
    filtered
}

/// Builds the effective policy for one job.
pub fn resolve_policy(
    channel: Channel,
    skills: &[Skill],
    agent: Option<&AgentProfile>,
    plugins: &[PluginConfig],
) -> ToolPolicy {
    let mut fragments = vec![default_policy(channel)];
    fragments.extend(
        skills
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| s.tool_policy.clone()),
    );
    if let Some(policy) = agent.and_then(|a| a.tool_policy.clone()) {
        fragments.push(policy);
    }
    fragments.extend(
        plugins
            .iter()
            .filter(|p| p.enabled)
            .map(PluginConfig::tool_policy),
    );

    let merged = merge_policies(&fragments);
    tracing::debug!(
        channel = %channel,
        fragments = fragments.len(),
        allow = ?merged.allow,
        deny = ?merged.deny,
        "tool policy resolved"
    );
    merged
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builtin::{Calculate, CurrentTime};
    use proptest::prelude::*;

    #[test]
    fn whatsapp_denies_send_message() {
        let policy = default_policy(Channel::WhatsApp);
        assert!(policy.admits(GET_CURRENT_TIME));
        assert!(policy.admits(CALCULATE));
        assert!(!policy.admits(SEND_MESSAGE));
        assert!(default_policy(Channel::Web).admits(SEND_MESSAGE));
    }

    #[test]
    fn memory_tools_are_on_by_default() {
        for channel in [Channel::Web, Channel::WhatsApp] {
            let policy = default_policy(channel);
            assert!(policy.admits(MEMORY_SEARCH));
            assert!(policy.admits(MEMORY_STORE));
        }
    }

    #[test]
    fn undeclared_tools_are_denied() {
        assert!(!default_policy(Channel::Web).admits("web_search"));
    }

    #[test]
    fn agent_deny_beats_skill_allow() {
        let skills = vec![
            Skill {
                id: "s1".into(),
                name: "search".into(),
                enabled: true,
                tool_policy: Some(ToolPolicy::new(["web_search"], Vec::<&str>::new())),
            },
            Skill {
                id: "s2".into(),
                name: "disabled".into(),
                enabled: false,
                tool_policy: Some(ToolPolicy::new(["shell"], Vec::<&str>::new())),
            },
        ];
        let agent = AgentProfile {
            id: "a".into(),
            name: "a".into(),
            system_prompt: String::new(),
            model: None,
            fallback_model: None,
            tool_policy: Some(ToolPolicy::new(Vec::<&str>::new(), [CALCULATE])),
        };

        let policy = resolve_policy(Channel::Web, &skills, Some(&agent), &[]);
        assert!(policy.admits("web_search"));
        assert!(!policy.admits("shell"));
        assert!(!policy.admits(CALCULATE));
        assert!(policy.admits(GET_CURRENT_TIME));
    }

    #[test]
    fn plugins_contribute_fragments() {
        let plugins = vec![
            PluginConfig {
                name: "lockdown".into(),
                enabled: true,
                allow: vec![],
                deny: vec![GET_CURRENT_TIME.into()],
            },
            PluginConfig {
                name: "off".into(),
                enabled: false,
                allow: vec![],
                deny: vec![CALCULATE.into()],
            },
        ];
        let policy = resolve_policy(Channel::WhatsApp, &[], None, &plugins);
        assert!(!policy.admits(GET_CURRENT_TIME));
        assert!(policy.admits(CALCULATE));
    }

    #[test]
    fn filter_keeps_admitted_tools_only() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Calculate)).unwrap();
        registry.register(Arc::new(CurrentTime::new(chrono_tz::UTC))).unwrap();

        let policy = ToolPolicy::new([CALCULATE], Vec::<&str>::new());
        let filtered = filter_tools(&registry, &policy);
        assert_eq!(filtered.names(), vec![CALCULATE]);
        assert_eq!(
            filtered.get(CALCULATE).unwrap().description(),
            registry.get(CALCULATE).unwrap().description()
        );
    }

    fn arb_policy() -> impl Strategy<Value = ToolPolicy> {
        let names = prop::sample::subsequence(vec!["a", "b", "c", "d", "e"], 0..=5);
        (names.clone(), names).prop_map(|(allow, deny)| ToolPolicy::new(allow, deny))
    }

    proptest! {
        #[test]
        fn merge_is_associative(
            a in arb_policy(),
            b in arb_policy(),
            c in arb_policy(),
            name in prop::sample::select(vec!["a", "b", "c", "d", "e", "z"]),
        ) {
            let flat = merge_policies([&a, &b, &c]);
            let inner = merge_policies([&b, &c]);
            let nested = merge_policies([&a, &inner]);
            prop_assert_eq!(flat.admits(name), nested.admits(name));
            let swapped = merge_policies([&c, &a, &b]);
            prop_assert_eq!(flat.admits(name), swapped.admits(name));
        }

        #[test]
        fn deny_always_overrides_allow(
            fragments in prop::collection::vec(arb_policy(), 1..6),
            name in prop::sample::select(vec!["a", "b", "c", "d", "e"]),
        ) {
            let merged = merge_policies(&fragments);
            if fragments.iter().any(|f| f.deny.contains(name)) {
                prop_assert!(!merged.admits(name));
            }
        }
    }
}
