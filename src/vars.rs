use std::collections::HashMap;

use tracing::warn;

use crate::error::AppResult;
use crate::mi::GdbBackend;
use crate::mi::commands::MiCommand;
use crate::models::{VarCreateResponse, VarUpdateChange};

/// Cache key for variable objects.
///
/// gdb reuses small frame ids across recursive calls, so `(frame, thread)`
/// alone can name two different logical frames; the innermost stack depth
/// disambiguates them. Reuse only happens within a genuinely identical
/// execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableKey {
    pub frame_id: i64,
    pub thread_id: i64,
    pub depth: u32,
}

/// A tracked gdb variable object.
#[derive(Debug, Clone)]
pub struct VarObj {
    /// gdb-side handle (`var1`, `var1.member`, ...)
    pub name: String,
    /// Source expression, or the synthetic path of an element
    pub expression: String,
    /// Child count as gdb reports it (a string integer)
    pub numchild: String,
    pub value: String,
    pub r#type: String,
    /// Created from a stack-variable listing rather than an ad-hoc
    /// expression
    pub is_var: bool,
    /// Created via a relative path for an array/structure element
    pub is_child: bool,
}

fn var_from_create(
    expression: &str,
    is_var: bool,
    is_child: bool,
    response: &VarCreateResponse,
) -> VarObj {
    VarObj {
        name: response.name.clone(),
        expression: expression.to_string(),
        numchild: response.numchild.clone().unwrap_or_else(|| "0".to_string()),
        value: response.value.clone().unwrap_or_default(),
        r#type: response.r#type.clone().unwrap_or_default(),
        is_var,
        is_child,
    }
}

/// What a `-var-update` changelist entry means for the cached entry.
#[derive(Debug, PartialEq, Eq)]
enum UpdateAction {
    /// No change reported
    Keep,
    /// Still in scope: take the new value
    Refresh,
    /// Out of scope, invalid, or the type changed: the handle is dead and
    /// the expression must be re-created
    Recreate,
}

fn classify_update(change: Option<&VarUpdateChange>) -> UpdateAction {
    let Some(change) = change else {
        return UpdateAction::Keep;
    };
    match change.in_scope.as_deref() {
        Some("true") => {
            if change.type_changed.as_deref() == Some("true") {
                // children listed against the old handle would carry stale
                // type information
                UpdateAction::Recreate
            } else {
                UpdateAction::Refresh
            }
        }
        // "false" and "invalid" both mean the handle is unusable
        _ => UpdateAction::Recreate,
    }
}

/// Keyed cache of variable objects. Every cached entry has a matching live
/// handle in gdb; the cache survives stops so varobj value caching works
/// across steps within the same execution context.
#[derive(Debug, Default)]
pub struct VarManager {
    variables: HashMap<VariableKey, Vec<VarObj>>,
}

impl VarManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_vars(&self, key: VariableKey) -> Option<&[VarObj]> {
        self.variables.get(&key).map(|list| list.as_slice())
    }

    pub fn get_var(&self, key: VariableKey, expression: &str) -> Option<&VarObj> {
        self.variables
            .get(&key)?
            .iter()
            .find(|v| v.expression == expression)
    }

    pub fn get_var_by_name(&self, key: VariableKey, name: &str) -> Option<&VarObj> {
        self.variables.get(&key)?.iter().find(|v| v.name == name)
    }

    /// Track a freshly created varobj; insertion order is preserved so the
    /// client sees a stable listing.
    pub fn add_var(
        &mut self,
        key: VariableKey,
        expression: &str,
        is_var: bool,
        is_child: bool,
        response: &VarCreateResponse,
    ) -> VarObj {
        let var = var_from_create(expression, is_var, is_child, response);
        self.variables.entry(key).or_default().push(var.clone());
        var
    }

    /// Drop a varobj and every tracked child (gdb handles children as
    /// `parent.member...`, and deletes them together with the parent).
    /// Returns whether the parent was cached.
    fn evict_cached(&mut self, key: VariableKey, name: &str) -> bool {
        let Some(list) = self.variables.get_mut(&key) else {
            return false;
        };
        let child_prefix = format!("{}.", name);
        let before = list.len();
        list.retain(|v| v.name != name && !v.name.starts_with(&child_prefix));
        before != list.len()
    }

    /// Delete a varobj in gdb and drop it (and its tracked children) from
    /// the cache. A gdb-side failure still evicts: the handle is unusable
    /// either way, and the invariant is that dead handles never linger in
    /// the cache.
    pub async fn remove_var(
        &mut self,
        backend: &GdbBackend,
        key: VariableKey,
        name: &str,
    ) -> AppResult<()> {
        if let Err(e) = backend
            .send_command(&MiCommand::var_delete(name, false))
            .await
        {
            warn!("var-delete {} failed: {}", name, e);
        }
        self.evict_cached(key, name);
        Ok(())
    }

    /// Refresh a tracked varobj via `-var-update`. In-scope changes update
    /// the cached value in place; scope loss or a type change deletes the
    /// handle on both sides and re-creates the same expression against the
    /// current frame, preserving how the entry was originally created.
    pub async fn update_var(
        &mut self,
        backend: &GdbBackend,
        key: VariableKey,
        varobj: &VarObj,
    ) -> AppResult<VarObj> {
        let results = backend
            .send_command(&MiCommand::var_update(&varobj.name))
            .await?;
        let changes = VarUpdateChange::list_from_value(&results)?;
        let change = changes.iter().find(|c| c.name == varobj.name);
        match classify_update(change) {
            UpdateAction::Keep => Ok(varobj.clone()),
            UpdateAction::Refresh => {
                let change = change.expect("refresh implies a changelist entry");
                let list = self.variables.entry(key).or_default();
                if let Some(cached) = list.iter_mut().find(|v| v.name == varobj.name) {
                    if let Some(value) = &change.value {
                        cached.value = value.clone();
                    }
                    if let Some(numchild) = &change.new_num_children {
                        cached.numchild = numchild.clone();
                    }
                    Ok(cached.clone())
                } else {
                    Ok(varobj.clone())
                }
            }
            UpdateAction::Recreate => {
                self.remove_var(backend, key, &varobj.name).await?;
                let results = backend
                    .send_command(&MiCommand::var_create(None, None, &varobj.expression))
                    .await?;
                let response: VarCreateResponse = serde_json::from_value(results)?;
                Ok(self.add_var(
                    key,
                    &varobj.expression,
                    varobj.is_var,
                    varobj.is_child,
                    &response,
                ))
            }
        }
    }

    /// Session teardown: delete every tracked handle.
    pub async fn clear(&mut self, backend: &GdbBackend) {
        for (_, list) in self.variables.drain() {
            for var in list {
                // children go away with their parents; gdb rejects the
                // redundant deletes and that is fine
                let _ = backend
                    .send_command(&MiCommand::var_delete(&var.name, false))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn create_response(name: &str, value: &str, numchild: &str) -> VarCreateResponse {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "numchild": numchild,
            "value": value,
            "type": "int",
        }))
        .unwrap()
    }

    fn key() -> VariableKey {
        VariableKey {
            frame_id: 0,
            thread_id: 1,
            depth: 4,
        }
    }

    #[test]
    fn test_add_then_get() {
        let mut manager = VarManager::new();
        let added = manager.add_var(key(), "count", true, false, &create_response("var1", "3", "0"));
        assert_eq!(added.name, "var1");
        assert_eq!(manager.get_var(key(), "count").unwrap().name, "var1");
        assert_eq!(
            manager.get_var_by_name(key(), "var1").unwrap().expression,
            "count"
        );
        assert!(manager.get_var(key(), "other").is_none());
        // a different depth is a different execution context
        let deeper = VariableKey { depth: 5, ..key() };
        assert!(manager.get_var(deeper, "count").is_none());
    }

    #[test]
    fn test_evict_removes_tracked_children() {
        let mut manager = VarManager::new();
        manager.add_var(key(), "s", true, false, &create_response("var1", "{...}", "2"));
        manager.add_var(key(), "s.x", false, true, &create_response("var1.x", "1", "0"));
        manager.add_var(
            key(),
            "s.inner.y",
            false,
            true,
            &create_response("var1.inner.y", "2", "0"),
        );
        manager.add_var(key(), "t", true, false, &create_response("var10", "0", "0"));

        assert!(manager.evict_cached(key(), "var1"));
        let remaining = manager.get_vars(key()).unwrap();
        assert_eq!(remaining.len(), 1);
        // var10 must not be caught by the "var1." prefix
        assert_eq!(remaining[0].name, "var10");
    }

    #[test]
    fn test_classify_update() {
        assert_eq!(classify_update(None), UpdateAction::Keep);

        let refresh: VarUpdateChange = serde_json::from_value(serde_json::json!({
            "name": "var1", "value": "4", "in_scope": "true", "type_changed": "false",
        }))
        .unwrap();
        assert_eq!(classify_update(Some(&refresh)), UpdateAction::Refresh);

        let out_of_scope: VarUpdateChange = serde_json::from_value(serde_json::json!({
            "name": "var1", "in_scope": "false",
        }))
        .unwrap();
        assert_eq!(classify_update(Some(&out_of_scope)), UpdateAction::Recreate);

        let invalid: VarUpdateChange = serde_json::from_value(serde_json::json!({
            "name": "var1", "in_scope": "invalid",
        }))
        .unwrap();
        assert_eq!(classify_update(Some(&invalid)), UpdateAction::Recreate);

        let type_changed: VarUpdateChange = serde_json::from_value(serde_json::json!({
            "name": "var1", "value": "{...}", "in_scope": "true", "type_changed": "true",
            "new_type": "struct other",
        }))
        .unwrap();
        assert_eq!(classify_update(Some(&type_changed)), UpdateAction::Recreate);
    }

    #[test]
    fn test_recreate_preserves_origin_flags() {
        // the cache half of the recreate path: evict the dead handle, track
        // the replacement under the same expression and origin flags
        let mut manager = VarManager::new();
        let old = manager.add_var(key(), "count", true, false, &create_response("var1", "3", "0"));
        manager.evict_cached(key(), &old.name);
        assert!(manager.get_var_by_name(key(), "var1").is_none());

        let recreated = manager.add_var(
            key(),
            &old.expression,
            old.is_var,
            old.is_child,
            &create_response("var2", "7", "0"),
        );
        assert_eq!(recreated.name, "var2");
        let cached = manager.get_var(key(), "count").unwrap();
        assert_eq!(cached.name, "var2");
        assert!(cached.is_var);
        assert!(!cached.is_child);
        assert_eq!(cached.value, "7");
    }
}
