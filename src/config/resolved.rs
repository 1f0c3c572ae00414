use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::errors::{RetryPolicy, WaypointError};
use crate::session::manager::{fingerprint, SessionOptions};
use crate::session::state::TargetDescriptor;
use super::credentials::resolve_credential;
use super::parser::parse_config;
use super::types::{Scanner, WaypointConfig};
use tracing::{debug, warn};

const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_OUTPUT_DIR: &str = "./waypoint-output";

/// Values supplied on the command line. `None` / `false` defer to the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub web_url: String,
    pub repo_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub session_id: Option<String>,
    pub pipeline_testing: bool,
    pub disable_loader: bool,
    pub retry_failed: Option<bool>,
    pub skip_preflight: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LLMSettings {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Tried in order after this provider; entries have no fallback of their own.
    pub fallback: Vec<LLMSettings>,
}

/// Everything a run needs, after merging CLI flags, the config file and the environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: TargetDescriptor,
    pub config: WaypointConfig,
    pub config_fingerprint: String,
    pub output_dir: PathBuf,
    pub session_id: Option<String>,
    pub pipeline_testing: bool,
    pub disable_loader: bool,
    pub exploits_mutate_tree: bool,
    pub preflight: bool,
    pub retry_failed_on_resume: bool,
    pub agent_timeout: Duration,
    pub retry: RetryPolicy,
    pub llm: LLMSettings,
    pub scanners: Vec<Scanner>,
}

impl RunConfig {
    /// Defaults for `target` with no config file.
    pub fn for_target(target: TargetDescriptor, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            config: WaypointConfig::default(),
            config_fingerprint: fingerprint(""),
            output_dir: output_dir.into(),
            session_id: None,
            pipeline_testing: false,
            disable_loader: false,
            exploits_mutate_tree: false,
            preflight: true,
            retry_failed_on_resume: true,
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            llm: LLMSettings {
                provider: "anthropic".into(),
                model: None,
                api_key: None,
                base_url: None,
                fallback: Vec::new(),
            },
            scanners: Scanner::ALL.to_vec(),
        }
    }

    pub async fn resolve(overrides: RunOverrides) -> Result<Self, WaypointError> {
        let target = resolve_target(&overrides.web_url, &overrides.repo_path, overrides.config_path.clone())?;

        let (config, raw) = match &overrides.config_path {
            Some(path) => parse_config(path).await?,
            None => (WaypointConfig::default(), String::new()),
        };

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| config.output.as_ref().and_then(|o| o.directory.as_ref()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        // Checkpoint resets remove untracked files, which would take session
        // state and audit logs with them.
        if std::path::absolute(&output_dir)?.starts_with(&target.repo_path) {
            return Err(WaypointError::Config(format!(
                "Output directory {} must be outside the target repository",
                output_dir.display()
            )));
        }

        let mut resolved = Self::for_target(target, output_dir);
        resolved.config_fingerprint = fingerprint(&raw);
        resolved.session_id = overrides.session_id.clone();

        let execution = config.execution.clone().unwrap_or_default();
        resolved.pipeline_testing = overrides.pipeline_testing || execution.pipeline_testing.unwrap_or(false);
        resolved.disable_loader = overrides.disable_loader || execution.disable_loader.unwrap_or(false);
        resolved.exploits_mutate_tree = execution.exploits_mutate_tree.unwrap_or(false);
        resolved.preflight = !overrides.skip_preflight && execution.preflight.unwrap_or(true);
        if let Some(secs) = execution.agent_timeout_secs {
            resolved.agent_timeout = Duration::from_secs(secs);
        }

        let retry = config.retry.clone().unwrap_or_default();
        let max_attempts = retry.max_attempts.unwrap_or(3);
        resolved.retry = if resolved.pipeline_testing {
            RetryPolicy::accelerated(max_attempts)
        } else {
            let base = retry.base_delay_ms.map(Duration::from_millis).unwrap_or(Duration::from_secs(2));
            let max = retry.max_delay_ms.map(Duration::from_millis).unwrap_or(Duration::from_secs(30));
            RetryPolicy::new(max_attempts, base, max).with_jitter(retry.jitter.unwrap_or(true))
        };
        resolved.retry_failed_on_resume = overrides
            .retry_failed
            .or(retry.retry_failed_on_resume)
            .unwrap_or(true);

        resolved.llm = resolve_llm(&overrides, &config);
        if let Some(enabled) = config.tools.as_ref().and_then(|t| t.enabled.clone()) {
            resolved.scanners = enabled;
        }

        resolved.config = config;
        debug!(
            web_url = %resolved.target.web_url,
            output = %resolved.output_dir.display(),
            pipeline_testing = resolved.pipeline_testing,
            "Run configuration resolved"
        );
        Ok(resolved)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            session_id: self.session_id.clone(),
            config_fingerprint: self.config_fingerprint.clone(),
            pipeline_testing: self.pipeline_testing,
            disable_loader: self.disable_loader,
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.output_dir.join("sessions")
    }

    pub fn session_output_dir(&self, session_id: &str) -> PathBuf {
        self.output_dir.join(session_id)
    }

    /// Deliverables live inside the repository so checkpoints capture them.
    pub fn deliverables_dir(&self) -> PathBuf {
        self.target.repo_path.join("deliverables")
    }

    pub fn rules_text(&self) -> String {
        self.config.rules.as_ref().map(|r| r.describe()).unwrap_or_default()
    }

    /// Values the audit trail must never contain.
    pub fn secrets(&self) -> Vec<String> {
        std::iter::once(&self.llm)
            .chain(self.llm.fallback.iter())
            .filter_map(|s| s.api_key.clone())
            .collect()
    }
}

fn resolve_llm(overrides: &RunOverrides, config: &WaypointConfig) -> LLMSettings {
    let file = config.llm.clone().unwrap_or_default();
    let provider = overrides
        .provider
        .clone()
        .or(file.provider)
        .unwrap_or_else(|| "anthropic".to_string());
    let api_key = resolve_api_key(&provider, overrides.api_key.clone(), file.api_key.as_deref());

    let fallback = file
        .fallback
        .into_iter()
        .filter(|f| f.provider != provider)
        .map(|f| LLMSettings {
            api_key: resolve_api_key(&f.provider, None, f.api_key.as_deref()),
            provider: f.provider,
            model: f.model,
            base_url: f.base_url,
            fallback: Vec::new(),
        })
        .collect();

    LLMSettings {
        provider,
        model: overrides.model.clone().or(file.model),
        api_key,
        base_url: overrides.base_url.clone().or(file.base_url),
        fallback,
    }
}

/// Flag, then config file (`$VAR` allowed), then the provider's environment variable.
fn resolve_api_key(provider: &str, flag: Option<String>, file: Option<&str>) -> Option<String> {
    let env_var = match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        _ => None,
    };
    let api_key = flag
        .or_else(|| file.and_then(resolve_credential))
        .or_else(|| env_var.and_then(|v| std::env::var(v).ok()).filter(|k| !k.is_empty()));
    if api_key.is_none() && provider != "local" {
        warn!(provider = %provider, "No API key configured for LLM provider");
    }
    api_key
}

/// Normalised target identity: trailing slash trimmed, repository canonicalized.
pub fn resolve_target(
    web_url: &str,
    repo_path: &Path,
    config_path: Option<PathBuf>,
) -> Result<TargetDescriptor, WaypointError> {
    validate_web_url(web_url)?;
    Ok(TargetDescriptor {
        web_url: web_url.trim_end_matches('/').to_string(),
        repo_path: validate_repo_path(repo_path)?,
        config_path,
    })
}

fn validate_web_url(url: &str) -> Result<(), WaypointError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| WaypointError::InvalidTarget(format!("Web URL must be http(s): {}", url)))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(WaypointError::InvalidTarget(format!("Web URL has no host: {}", url)));
    }
    Ok(())
}

fn validate_repo_path(path: &Path) -> Result<PathBuf, WaypointError> {
    if !path.is_dir() {
        return Err(WaypointError::InvalidTarget(format!(
            "Repository path is not a directory: {}",
            path.display()
        )));
    }
    Ok(path.canonicalize()?)
}
