use super::{HookEvent, HookPlan, HookRegistry, PlannedCommand};
use regex::Regex;
use std::collections::HashMap;

/// Builds a [`HookPlan`] for one triggered event, filtering entries by
/// their matcher against the event's context (tool name for tool events,
/// `trigger` value for session events; empty matcher matches everything),
/// deduplicating by `(command, timeout)` while keeping the
/// highest-priority (Project > User > Extension) occurrence, and setting
/// `sequential` iff any surviving entry requested it.
pub struct HookPlanner<'a> {
    registry: &'a HookRegistry,
}

impl<'a> HookPlanner<'a> {
    pub fn new(registry: &'a HookRegistry) -> Self {
        Self { registry }
    }

    pub fn build_plan(&self, event: HookEvent, context: &str) -> HookPlan {
        let entries = self.registry.entries_for(event);

        // command+timeout -> (source, sequential contributed by this entry)
        let mut survivors: HashMap<(String, u64), (crate::agent::hooks::HookSource, bool)> =
            HashMap::new();

        for entry in entries {
            if !matcher_matches(entry.matcher.as_deref(), context) {
                continue;
            }
            for cmd in &entry.hooks {
                if !cmd.is_valid() {
                    continue;
                }
                let key = (cmd.command.clone(), cmd.timeout().as_millis() as u64);
                match survivors.get(&key) {
                    Some((existing_source, _)) if *existing_source <= entry.source => {
                        // existing occurrence already has equal-or-higher priority
                        let merged_seq = survivors.get(&key).unwrap().1 || entry.sequential;
                        survivors.insert(key, (*existing_source, merged_seq));
                    }
                    _ => {
                        survivors.insert(key, (entry.source, entry.sequential));
                    }
                }
            }
        }

        let sequential = survivors.values().any(|(_, seq)| *seq);
        let mut commands: Vec<PlannedCommand> = survivors
            .into_keys()
            .map(|(command, timeout_ms)| PlannedCommand {
                command,
                timeout_ms,
            })
            .collect();
        commands.sort_by(|a, b| a.command.cmp(&b.command));

        HookPlan {
            event: Some(event),
            commands,
            sequential,
        }
    }
}

/// A matcher is a regex tested against the context; if it fails to compile
/// it's tested as a literal string instead. An absent/empty matcher matches
/// every context.
fn matcher_matches(matcher: Option<&str>, context: &str) -> bool {
    let Some(pattern) = matcher else {
        return true;
    };
    if pattern.is_empty() {
        return true;
    }
    match Regex::new(pattern) {
        Ok(re) => re.is_match(context),
        Err(_) => pattern == context,
    }
}
