use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use scriptline_utils::error::ConfigError;

use crate::model::{
    ApplyMode, CliArgs, Config, ConfigSource, ProviderKind, TaskRoute,
};
use crate::stages::StageDefinition;

/// Directory searched for upward from the working directory.
pub const CONFIG_DIR: &str = ".scriptline";
pub const CONFIG_FILE: &str = "config.toml";
/// Overrides `[llm].provider`; a CLI flag still wins.
pub const PROVIDER_ENV: &str = "SCRIPTLINE_LLM_PROVIDER";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    defaults: Option<TomlDefaults>,
    llm: Option<TomlLlm>,
    validator: Option<TomlValidator>,
    quality_gate: Option<TomlQualityGate>,
    pipeline: Option<TomlPipeline>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDefaults {
    max_iterations: Option<u32>,
    verbose: Option<bool>,
    home: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLlm {
    provider: Option<String>,
    model: Option<String>,
    timeout_seconds: Option<u64>,
    max_calls: Option<u32>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    max_tokens: Option<u32>,
    #[serde(default)]
    tasks: BTreeMap<String, TaskRoute>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlValidator {
    min_chars: Option<usize>,
    max_chars: Option<usize>,
    error_ratio: Option<f64>,
    marker: Option<String>,
    duplicate_min_chars: Option<usize>,
    forbid_headings: Option<bool>,
    forbid_lists: Option<bool>,
    forbid_urls: Option<bool>,
    forbid_footnotes: Option<bool>,
    flag_numeric_claims: Option<bool>,
    sentence_endings: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlQualityGate {
    max_rounds: Option<u32>,
    rescue_passes: Option<u32>,
    rebuild: Option<bool>,
    rebuild_sections: Option<usize>,
    apply_mode: Option<ApplyMode>,
    snapshots: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlPipeline {
    skip: Option<Vec<String>>,
    transforms: Option<Vec<String>>,
    stages: Option<Vec<StageDefinition>>,
}

/// Copy every `Some` field of a file section onto the resolved section and
/// attribute it to the file.
macro_rules! overlay {
    ($config:ident . $section:ident <- $file:expr, $source:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $file.$field {
                $config.$section.$field = value;
                $config.attribute(
                    concat!(stringify!($section), ".", stringify!($field)),
                    $source.clone(),
                );
            }
        )+
    };
}

fn parse_provider(raw: &str) -> Result<ProviderKind, ConfigError> {
    ProviderKind::from_str(raw.trim()).map_err(|_| ConfigError::InvalidValue {
        key: "llm.provider".to_string(),
        value: format!("'{raw}' is not valid. Must be 'anthropic', 'openrouter', 'stub' or 'manual'"),
    })
}

impl Config {
    /// Discover and load configuration with precedence CLI > env > file > defaults,
    /// searching upward from the current directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = env::current_dir()
            .map_err(|e| ConfigError::InvalidFile(format!("Failed to get current directory: {e}")))?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Path-driven variant of [`Config::discover`] used by tests to avoid
    /// process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)?;
            config.apply_file(file_config, ConfigSource::ConfigFile(path.clone()))?;
            tracing::debug!(path = %path.display(), "Loaded configuration file");
        }

        if let Ok(env_provider) = env::var(PROVIDER_ENV)
            && !env_provider.trim().is_empty()
        {
            config.llm.provider = parse_provider(&env_provider)?;
            config.attribute("llm.provider", ConfigSource::Env);
        }

        config.apply_cli(cli_args)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: TomlConfig, source: ConfigSource) -> Result<(), ConfigError> {
        let config = self;

        if let Some(defaults) = file.defaults {
            if let Some(home) = defaults.home {
                config.home = Some(home.into());
                config.attribute("defaults.home", source.clone());
            }
            overlay!(config.defaults <- defaults, source; max_iterations, verbose);
        }

        if let Some(llm) = file.llm {
            if let Some(provider) = &llm.provider {
                config.llm.provider = parse_provider(provider)?;
                config.attribute("llm.provider", source.clone());
            }
            if let Some(model) = llm.model {
                config.llm.model = Some(model);
                config.attribute("llm.model", source.clone());
            }
            if let Some(base_url) = llm.base_url {
                config.llm.base_url = Some(base_url);
                config.attribute("llm.base_url", source.clone());
            }
            if let Some(api_key_env) = llm.api_key_env {
                config.llm.api_key_env = Some(api_key_env);
                config.attribute("llm.api_key_env", source.clone());
            }
            if !llm.tasks.is_empty() {
                config.llm.tasks = llm.tasks;
                config.attribute("llm.tasks", source.clone());
            }
            overlay!(config.llm <- llm, source; timeout_seconds, max_calls, max_tokens);
        }

        if let Some(validator) = file.validator {
            overlay!(config.validator <- validator, source;
                min_chars, max_chars, error_ratio, marker, duplicate_min_chars,
                forbid_headings, forbid_lists, forbid_urls, forbid_footnotes,
                flag_numeric_claims, sentence_endings,
            );
        }

        if let Some(gate) = file.quality_gate {
            overlay!(config.quality_gate <- gate, source;
                max_rounds, rescue_passes, rebuild, rebuild_sections, apply_mode, snapshots,
            );
        }

        if let Some(pipeline) = file.pipeline {
            overlay!(config.pipeline <- pipeline, source; skip, transforms);
            if let Some(stages) = pipeline.stages {
                config.pipeline.stages = Some(stages);
                config.attribute("pipeline.stages", source);
            }
        }

        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliArgs) -> Result<(), ConfigError> {
        if let Some(verbose) = cli.verbose {
            self.defaults.verbose = verbose;
            self.attribute("defaults.verbose", ConfigSource::Cli);
        }
        if let Some(max_iterations) = cli.max_iterations {
            self.defaults.max_iterations = max_iterations;
            self.attribute("defaults.max_iterations", ConfigSource::Cli);
        }
        if let Some(provider) = &cli.provider {
            self.llm.provider = parse_provider(provider)?;
            self.attribute("llm.provider", ConfigSource::Cli);
        }
        if let Some(model) = &cli.model {
            self.llm.model = Some(model.clone());
            self.attribute("llm.model", ConfigSource::Cli);
        }
        if let Some(min_chars) = cli.min_chars {
            self.validator.min_chars = min_chars;
            self.attribute("validator.min_chars", ConfigSource::Cli);
        }
        if let Some(max_chars) = cli.max_chars {
            self.validator.max_chars = max_chars;
            self.attribute("validator.max_chars", ConfigSource::Cli);
        }
        if let Some(max_rounds) = cli.max_rounds {
            self.quality_gate.max_rounds = max_rounds;
            self.attribute("quality_gate.max_rounds", ConfigSource::Cli);
        }
        if let Some(apply_mode) = cli.apply_mode {
            self.quality_gate.apply_mode = apply_mode;
            self.attribute("quality_gate.apply_mode", ConfigSource::Cli);
        }
        if !cli.skip.is_empty() {
            self.pipeline.skip = cli.skip.clone();
            self.attribute("pipeline.skip", ConfigSource::Cli);
        }
        Ok(())
    }

    /// Walk up from `start_dir` looking for `.scriptline/config.toml`, stopping
    /// at repository root markers (.git, .hg, .svn) or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if [".git", ".hg", ".svn"].iter().any(|m| dir.join(m).exists()) {
                break;
            }
            current = dir.parent();
        }
        None
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidFile(format!("Failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join(CONFIG_FILE);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();

        let config = Config::discover_from(temp.path(), &CliArgs::default()).unwrap();
        assert_eq!(config.validator.min_chars, 1000);
        assert_eq!(config.quality_gate.max_rounds, 3);
        assert_eq!(config.quality_gate.apply_mode, ApplyMode::Apply);
        assert_eq!(config.source_of("validator.min_chars").label(), "default");
    }

    #[test]
    #[serial]
    fn test_file_values_are_attributed() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        write_config(
            temp.path(),
            r#"
[llm]
provider = "stub"

[llm.tasks.judge]
temperature = 0.0

[validator]
min_chars = 500
max_chars = 900

[quality_gate]
apply_mode = "propose"
rebuild = true

[pipeline]
skip = ["research"]
"#,
        );

        let config = Config::discover_from(temp.path(), &CliArgs::default()).unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Stub);
        assert_eq!(config.validator.min_chars, 500);
        assert_eq!(config.validator.max_chars, 900);
        assert_eq!(config.quality_gate.apply_mode, ApplyMode::Propose);
        assert!(config.quality_gate.rebuild);
        assert_eq!(config.pipeline.skip, vec!["research"]);
        assert_eq!(config.llm.route("judge").temperature, Some(0.0));
        assert_eq!(config.source_of("validator.min_chars").label(), "config");
        assert_eq!(config.source_of("validator.marker").label(), "default");
    }

    #[test]
    #[serial]
    fn test_discovery_walks_up_but_stops_at_repo_root() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[validator]\nmin_chars = 10\nmax_chars = 20\n");
        let repo = temp.path().join("repo");
        let nested = repo.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = Config::discover_config_file_from(&nested);
        assert_eq!(found, Some(temp.path().join(CONFIG_DIR).join(CONFIG_FILE)));

        fs::create_dir(repo.join(".git")).unwrap();
        assert_eq!(Config::discover_config_file_from(&nested), None);
    }

    #[test]
    #[serial]
    fn test_cli_beats_env_beats_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        write_config(temp.path(), "[llm]\nprovider = \"anthropic\"\n");

        // SAFETY: serialized with every other env-reading test
        unsafe { env::set_var(PROVIDER_ENV, "manual") };
        let from_env = Config::discover_from(temp.path(), &CliArgs::default());
        let cli = CliArgs {
            provider: Some("stub".to_string()),
            min_chars: Some(100),
            max_chars: Some(200),
            ..CliArgs::default()
        };
        let from_cli = Config::discover_from(temp.path(), &cli);
        unsafe { env::remove_var(PROVIDER_ENV) };

        let from_env = from_env.unwrap();
        assert_eq!(from_env.llm.provider, ProviderKind::Manual);
        assert_eq!(from_env.source_of("llm.provider").label(), "env");

        let from_cli = from_cli.unwrap();
        assert_eq!(from_cli.llm.provider, ProviderKind::Stub);
        assert_eq!(from_cli.validator.max_chars, 200);
        assert_eq!(from_cli.source_of("llm.provider").label(), "cli");
    }

    #[test]
    #[serial]
    fn test_explicit_missing_config_is_not_found() {
        let cli = CliArgs {
            config_path: Some(PathBuf::from("/definitely/not/here.toml")),
            ..CliArgs::default()
        };
        let err = Config::discover_from(Path::new("."), &cli).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_bad_values_are_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();

        write_config(temp.path(), "[llm]\nprovider = \"gpt\"\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "llm.provider"));

        write_config(temp.path(), "[validator]\nmin_chars = 2000\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "validator.min_chars"));

        write_config(temp.path(), "[pipeline]\ntransforms = [\"shout\"]\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransform(ref n) if n == "shout"));

        write_config(temp.path(), "[surprise]\nvalue = 1\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile(_)));
    }

    #[test]
    #[serial]
    fn test_stage_override_is_loaded() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        write_config(
            temp.path(),
            r#"
[[pipeline.stages]]
name = "draft"
kind = "generate"
outputs = [{ path = "content/draft.md" }]

[[pipeline.stages]]
name = "script"
kind = "quality_gate"
inputs = ["content/draft.md"]
outputs = [{ path = "content/script.md", reject_placeholders = true }]
checkpoint = true
"#,
        );

        let config = Config::discover_from(temp.path(), &CliArgs::default()).unwrap();
        let stages = config.pipeline.stages.unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].name, "script");
        assert!(stages[1].outputs[0].reject_placeholders);
    }
}
