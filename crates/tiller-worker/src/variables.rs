// Variable and secret management with `${scope:key}` interpolation
//
// Four scopes: `var` (workflow variable), `secret` (workflow secret),
// `global` (global variable), `global_secret` (global secret). Secrets are
// encrypted at rest and decrypted only at resolution time; decrypted values
// flow into action payloads but never into logs or published events.
//
// Missing references stay in place and emit a warning - silent empty-string
// substitution would hide configuration drift.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use tiller_core::error::Result;
use tiller_core::model::{GlobalSecret, GlobalVariable, WorkflowSecret, WorkflowVariable};
use tiller_core::traits::Repository;
use tiller_storage::SecretCipher;

type VariableRef = (String, String);

fn reference_regex() -> Regex {
    Regex::new(r"\$\{([a-z_]+):([^}]+)\}").expect("reference pattern is valid")
}

/// Service for variables, secrets, and placeholder resolution
#[derive(Clone)]
pub struct VariableService<R> {
    repo: R,
    cipher: SecretCipher,
}

impl<R: Repository + Clone> VariableService<R> {
    pub fn new(repo: R, cipher: SecretCipher) -> Self {
        Self { repo, cipher }
    }

    // ------------------------------------------------------------------
    // Workflow-scoped stores
    // ------------------------------------------------------------------

    pub async fn set_workflow_variable(
        &self,
        workflow_id: Uuid,
        key: impl Into<String>,
        value: impl Into<String>,
        description: Option<String>,
    ) -> Result<WorkflowVariable> {
        self.repo
            .upsert_workflow_variable(WorkflowVariable {
                id: Uuid::now_v7(),
                workflow_id,
                key: key.into(),
                value: value.into(),
                description,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn workflow_variable(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<WorkflowVariable>> {
        self.repo.get_workflow_variable(workflow_id, key).await
    }

    pub async fn list_workflow_variables(&self, workflow_id: Uuid) -> Result<Vec<WorkflowVariable>> {
        self.repo.list_workflow_variables(workflow_id).await
    }

    pub async fn delete_workflow_variable(&self, workflow_id: Uuid, key: &str) -> Result<bool> {
        self.repo.delete_workflow_variable(workflow_id, key).await
    }

    /// Store a workflow secret, encrypting the value
    pub async fn set_workflow_secret(
        &self,
        workflow_id: Uuid,
        key: impl Into<String>,
        value: &str,
        description: Option<String>,
    ) -> Result<WorkflowSecret> {
        let ciphertext = self.cipher.encrypt(value)?;
        self.repo
            .upsert_workflow_secret(WorkflowSecret {
                id: Uuid::now_v7(),
                workflow_id,
                key: key.into(),
                ciphertext,
                description,
                created_at: Utc::now(),
            })
            .await
    }

    /// Decrypted value of a workflow secret
    pub async fn workflow_secret_value(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<String>> {
        match self.repo.get_workflow_secret(workflow_id, key).await? {
            Some(secret) => Ok(Some(self.cipher.decrypt(&secret.ciphertext)?)),
            None => Ok(None),
        }
    }

    /// Secrets for a workflow, ciphertext only
    pub async fn list_workflow_secrets(&self, workflow_id: Uuid) -> Result<Vec<WorkflowSecret>> {
        self.repo.list_workflow_secrets(workflow_id).await
    }

    pub async fn delete_workflow_secret(&self, workflow_id: Uuid, key: &str) -> Result<bool> {
        self.repo.delete_workflow_secret(workflow_id, key).await
    }

    // ------------------------------------------------------------------
    // Global stores
    // ------------------------------------------------------------------

    pub async fn set_global_variable(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        description: Option<String>,
    ) -> Result<GlobalVariable> {
        self.repo
            .upsert_global_variable(GlobalVariable {
                id: Uuid::now_v7(),
                key: key.into(),
                value: value.into(),
                description,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn global_variable(&self, key: &str) -> Result<Option<GlobalVariable>> {
        self.repo.get_global_variable(key).await
    }

    pub async fn set_global_secret(
        &self,
        key: impl Into<String>,
        value: &str,
        description: Option<String>,
    ) -> Result<GlobalSecret> {
        let ciphertext = self.cipher.encrypt(value)?;
        self.repo
            .upsert_global_secret(GlobalSecret {
                id: Uuid::now_v7(),
                key: key.into(),
                ciphertext,
                description,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn global_secret_value(&self, key: &str) -> Result<Option<String>> {
        match self.repo.get_global_secret(key).await? {
            Some(secret) => Ok(Some(self.cipher.decrypt(&secret.ciphertext)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Interpolation
    // ------------------------------------------------------------------

    /// Resolve `${scope:key}` references in a string
    pub async fn interpolate_text(&self, text: &str, workflow_id: Option<Uuid>) -> String {
        let refs = collect_refs_from_text(text);
        let resolved = self.resolve_refs(&refs, workflow_id).await;
        substitute_text(text, &resolved)
    }

    /// Resolve `${scope:key}` references recursively through maps, sequences,
    /// and strings of the value tree
    pub async fn interpolate_value(&self, value: &Value, workflow_id: Option<Uuid>) -> Value {
        self.interpolate_value_with_secrets(value, workflow_id)
            .await
            .0
    }

    /// Like `interpolate_value`, additionally returning the plaintext values
    /// that came from `secret:` / `global_secret:` references. Callers that
    /// publish or persist anything derived from the interpolated tree must
    /// redact those values first (see `redact_secrets`).
    pub async fn interpolate_value_with_secrets(
        &self,
        value: &Value,
        workflow_id: Option<Uuid>,
    ) -> (Value, Vec<String>) {
        let mut refs = BTreeSet::new();
        collect_refs(value, &mut refs);
        let resolved = self.resolve_refs(&refs, workflow_id).await;

        let secrets = resolved
            .iter()
            .filter(|((scope, _), plaintext)| {
                (scope == "secret" || scope == "global_secret") && !plaintext.is_empty()
            })
            .map(|(_, plaintext)| plaintext.clone())
            .collect();

        (substitute_value(value, &resolved), secrets)
    }

    async fn resolve_refs(
        &self,
        refs: &BTreeSet<VariableRef>,
        workflow_id: Option<Uuid>,
    ) -> HashMap<VariableRef, String> {
        let mut resolved = HashMap::with_capacity(refs.len());
        for (scope, key) in refs {
            match self.resolve_one(scope, key, workflow_id).await {
                Some(value) => {
                    resolved.insert((scope.clone(), key.clone()), value);
                }
                None => {
                    warn!(scope = %scope, key = %key, "variable not found, leaving placeholder");
                }
            }
        }
        resolved
    }

    async fn resolve_one(&self, scope: &str, key: &str, workflow_id: Option<Uuid>) -> Option<String> {
        match scope {
            "var" => {
                let workflow_id = workflow_id?;
                self.workflow_variable(workflow_id, key)
                    .await
                    .ok()
                    .flatten()
                    .map(|v| v.value)
            }
            "secret" => {
                let workflow_id = workflow_id?;
                match self.workflow_secret_value(workflow_id, key).await {
                    Ok(value) => value,
                    Err(err) => {
                        // Fatal for this reference only; the caller keeps going
                        warn!(key = %key, error = %err, "failed to decrypt workflow secret");
                        None
                    }
                }
            }
            "global" => self.global_variable(key).await.ok().flatten().map(|v| v.value),
            "global_secret" => match self.global_secret_value(key).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to decrypt global secret");
                    None
                }
            },
            _ => None,
        }
    }
}

fn collect_refs_from_text(text: &str) -> BTreeSet<VariableRef> {
    reference_regex()
        .captures_iter(text)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
        .collect()
}

fn collect_refs(value: &Value, out: &mut BTreeSet<VariableRef>) {
    match value {
        Value::String(text) => out.extend(collect_refs_from_text(text)),
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_refs(nested, out);
            }
        }
        _ => {}
    }
}

fn substitute_text(text: &str, resolved: &HashMap<VariableRef, String>) -> String {
    let mut out = text.to_string();
    for ((scope, key), value) in resolved {
        out = out.replace(&format!("${{{scope}:{key}}}"), value);
    }
    out
}

fn substitute_value(value: &Value, resolved: &HashMap<VariableRef, String>) -> Value {
    match value {
        Value::String(text) => Value::String(substitute_text(text, resolved)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, resolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| (key.clone(), substitute_value(nested, resolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Marker substituted for secret plaintext in redacted output
pub const REDACTED: &str = "[redacted]";

/// Replace every occurrence of the given secret values in a string.
/// Empty secrets are ignored (an empty pattern matches everywhere).
pub fn redact_secrets_text(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}

/// Scrub secret plaintext out of a value tree. Action results and error
/// messages pass through here before they reach the event bus, the task
/// row, the idempotency cache, or execution history.
pub fn redact_secrets(value: &Value, secrets: &[String]) -> Value {
    if secrets.is_empty() {
        return value.clone();
    }
    match value {
        Value::String(text) => Value::String(redact_secrets_text(text, secrets)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_secrets(item, secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| (key.clone(), redact_secrets(nested, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
