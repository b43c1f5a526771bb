use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    paths: PathSettings,
    ai: AiSettings,
    grading: GradingSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct PathSettings {
    pub(crate) base_path: PathBuf,
    pub(crate) reference_file: String,
    pub(crate) submission_extension: String,
    pub(crate) progress_file: PathBuf,
    pub(crate) cache_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct AiSettings {
    pub(crate) openai_api_key: String,
    pub(crate) openai_base_url: String,
    pub(crate) ai_model: String,
    pub(crate) ai_max_tokens: u32,
    pub(crate) ai_temperature: f64,
    pub(crate) ai_request_timeout: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct GradingSettings {
    pub(crate) max_retries: u32,
    pub(crate) retry_delay_seconds: u64,
    pub(crate) max_workers: usize,
    pub(crate) cache_parse_failures: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
    pub(crate) metrics_file: PathBuf,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
    #[error("failed to load env file {path}: {message}")]
    EnvFile { path: String, message: String },
}

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        Self::from_source(env_optional)
    }

    /// Loads a dotenv-format file into the process environment, then reads settings.
    pub(crate) fn load_with_env_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        dotenvy::from_path(path).map_err(|err| ConfigError::EnvFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::load()
    }

    pub(crate) fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base_path = PathBuf::from(or_default("AUTOGRADE_BASE_PATH", "./homework"));
        let reference_file = or_default("AUTOGRADE_REFERENCE_FILE", "template.py");
        let submission_extension = or_default("AUTOGRADE_SUBMISSION_EXTENSION", "py")
            .trim_start_matches('.')
            .to_ascii_lowercase();
        let progress_file =
            PathBuf::from(or_default("AUTOGRADE_PROGRESS_FILE", "grading_progress.json"));
        let cache_file = lookup("AUTOGRADE_CACHE_FILE").map(PathBuf::from);

        let openai_api_key = or_default("OPENAI_API_KEY", "");
        let openai_base_url = or_default("OPENAI_BASE_URL", "");
        let ai_model = or_default("AI_MODEL", "gpt-4");
        let ai_max_tokens = parse_u32("AI_MAX_TOKENS", or_default("AI_MAX_TOKENS", "150"))?;
        let ai_temperature = parse_f64("AI_TEMPERATURE", or_default("AI_TEMPERATURE", "0.0"))?;
        let ai_request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", or_default("AI_REQUEST_TIMEOUT", "60"))?;

        let max_retries =
            parse_u32("GRADING_MAX_RETRIES", or_default("GRADING_MAX_RETRIES", "3"))?;
        let retry_delay_seconds = parse_u64(
            "GRADING_RETRY_DELAY_SECONDS",
            or_default("GRADING_RETRY_DELAY_SECONDS", "5"),
        )?;
        let max_workers =
            parse_usize("GRADING_MAX_WORKERS", or_default("GRADING_MAX_WORKERS", "1"))?;
        let cache_parse_failures = lookup("GRADING_CACHE_PARSE_FAILURES")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);

        let log_level = or_default("AUTOGRADE_LOG_LEVEL", "info");
        let json = lookup("AUTOGRADE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            lookup("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let metrics_file =
            PathBuf::from(or_default("AUTOGRADE_METRICS_FILE", "grading_metrics.prom"));

        let settings = Self {
            paths: PathSettings {
                base_path,
                reference_file,
                submission_extension,
                progress_file,
                cache_file,
            },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                ai_model,
                ai_max_tokens,
                ai_temperature,
                ai_request_timeout,
            },
            grading: GradingSettings {
                max_retries,
                retry_delay_seconds,
                max_workers,
                cache_parse_failures,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled, metrics_file },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn paths(&self) -> &PathSettings {
        &self.paths
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grading.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_MAX_RETRIES",
                value: String::from("0"),
            });
        }

        if self.grading.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_MAX_WORKERS",
                value: String::from("0"),
            });
        }

        if self.paths.submission_extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "AUTOGRADE_SUBMISSION_EXTENSION",
                value: String::from("<empty>"),
            });
        }

        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }

        if self.ai.openai_base_url.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_BASE_URL"));
        }

        Ok(())
    }
}

impl GradingSettings {
    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}
