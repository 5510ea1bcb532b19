//! Pre-flight hooks: allow/deny checks run before any engine work starts.

use crate::config::RenderConfig;
use crate::domain::spec::VideoSpec;

/// Outcome of a pre-flight check.
#[derive(Debug, Clone)]
pub struct HookDecision {
    pub allow: bool,
    pub reason: Option<String>,
    /// Scene the denial refers to, when one specific scene is at fault.
    pub scene_id: Option<String>,
    /// Speech provider the denial refers to, for credential checks.
    pub provider: Option<String>,
}

impl HookDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            scene_id: None,
            provider: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
            scene_id: None,
            provider: None,
        }
    }

    pub fn deny_provider(
        scene_id: impl Into<String>,
        provider: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
            scene_id: Some(scene_id.into()),
            provider: Some(provider.into()),
        }
    }
}

/// A check run against the spec before rendering begins. A deny aborts the
/// render before any external tool or provider is touched.
pub trait PreflightHook: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, spec: &VideoSpec) -> HookDecision;
}

/// Denies when any scene requests a speech provider whose credential is not
/// configured. Catches the failure before a single scene is processed.
pub struct CredentialPreflight {
    config: RenderConfig,
}

impl CredentialPreflight {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

impl PreflightHook for CredentialPreflight {
    fn name(&self) -> &str {
        "credential-preflight"
    }

    fn check(&self, spec: &VideoSpec) -> HookDecision {
        for scene in &spec.scenes {
            if let Some(audio) = &scene.audio {
                if self.config.speech_credential(audio.provider).is_none() {
                    return HookDecision::deny_provider(
                        scene.id.clone(),
                        audio.provider.to_string(),
                        "no credential configured",
                    );
                }
            }
        }
        HookDecision::allow()
    }
}

/// Denies when the spec fails structural validation.
pub struct SpecPreflight;

impl PreflightHook for SpecPreflight {
    fn name(&self) -> &str {
        "spec-preflight"
    }

    fn check(&self, spec: &VideoSpec) -> HookDecision {
        match spec.validate() {
            Ok(()) => HookDecision::allow(),
            Err(e) => HookDecision::deny(e.to_string()),
        }
    }
}
