use super::{HookEntry, HookEvent, HookSource};
use serde_json::Value;
use tracing::warn;

/// Holds all hook entries loaded from project settings, user settings, and
/// active extensions. Source priority is Project > User > Extension, but
/// that only affects dedup precedence in the planner — every matching entry
/// from every source still runs.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    entries: Vec<HookEntry>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from the three settings layers. Each `raw` value is the
    /// `hooks` object of that layer's settings file (`hooks.<EventName>[]`).
    pub fn load(
        project_hooks: Option<&Value>,
        user_hooks: Option<&Value>,
        extension_hooks: Option<&Value>,
    ) -> Self {
        let mut entries = Vec::new();
        if let Some(v) = project_hooks {
            entries.extend(parse_layer(v, HookSource::Project));
        }
        if let Some(v) = user_hooks {
            entries.extend(parse_layer(v, HookSource::User));
        }
        if let Some(v) = extension_hooks {
            entries.extend(parse_layer(v, HookSource::Extension));
        }

        let mut registry = Self { entries: vec![] };
        for entry in entries {
            registry.register(entry);
        }
        registry
    }

    /// Validate and add an entry. Rejects entries with no `command`-typed
    /// commands.
    pub fn register(&mut self, entry: HookEntry) {
        if !entry.is_valid() {
            warn!(
                "rejecting hook entry for event {:?}: no valid command-type hooks",
                entry.event
            );
            return;
        }
        self.entries.push(entry);
    }

    pub fn entries_for(&self, event: HookEvent) -> Vec<&HookEntry> {
        self.entries.iter().filter(|e| e.event == event).collect()
    }

    pub fn all(&self) -> &[HookEntry] {
        &self.entries
    }
}

fn parse_layer(raw: &Value, source: HookSource) -> Vec<HookEntry> {
    let Some(obj) = raw.as_object() else {
        return vec![];
    };
    let mut out = Vec::new();
    for (event_name, decls) in obj {
        let Some(event) = parse_event_name(event_name) else {
            warn!("unknown hook event name in settings: {}", event_name);
            continue;
        };
        let Some(arr) = decls.as_array() else {
            continue;
        };
        for decl in arr {
            let matcher = decl
                .get("matcher")
                .and_then(Value::as_str)
                .map(str::to_string);
            let sequential = decl
                .get("sequential")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let hooks = decl
                .get("hooks")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|h| serde_json::from_value(h.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            out.push(HookEntry {
                event,
                matcher,
                sequential,
                hooks,
                source,
                enabled: true,
            });
        }
    }
    out
}

fn parse_event_name(name: &str) -> Option<HookEvent> {
    Some(match name {
        "SessionStart" => HookEvent::SessionStart,
        "SessionEnd" => HookEvent::SessionEnd,
        "BeforeAgent" => HookEvent::BeforeAgent,
        "AfterAgent" => HookEvent::AfterAgent,
        "BeforeModel" => HookEvent::BeforeModel,
        "AfterModel" => HookEvent::AfterModel,
        "BeforeToolSelection" => HookEvent::BeforeToolSelection,
        "BeforeTool" => HookEvent::BeforeTool,
        "AfterTool" => HookEvent::AfterTool,
        "PreCompress" => HookEvent::PreCompress,
        "Notification" => HookEvent::Notification,
        _ => return None,
    })
}
