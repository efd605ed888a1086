//! Fixtures shared by the engine's unit tests and the CLI's integration tests.

use camino::Utf8PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scriptline_config::{Config, StageDefinition};
use scriptline_llm::GenerationGateway;
use scriptline_status::JobMetadata;
use scriptline_utils::JobKey;
use scriptline_utils::paths::{self, HomeGuard, with_isolated_home};
use scriptline_validation::segments::join_segments;

use crate::cache::ArtifactCache;
use crate::context::StageContext;
use crate::orchestrator::Orchestrator;
use crate::registry::StageRegistry;

/// An isolated home with one job key and the registry built from `config`.
pub struct Fixture {
    _guard: HomeGuard,
    pub home: Utf8PathBuf,
    pub key: JobKey,
    pub job_dir: Utf8PathBuf,
    pub config: Config,
    pub metadata: JobMetadata,
    registry: StageRegistry,
}

impl Fixture {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let guard = with_isolated_home();
        let home = guard.home();
        let key = JobKey::new("CH01", 1).expect("valid fixture key");
        let config = config.with_home(&home);
        let registry = StageRegistry::from_config(&config).expect("fixture registry");
        Self {
            job_dir: paths::job_dir(&home, &key),
            _guard: guard,
            home,
            key,
            config,
            metadata: JobMetadata::default(),
            registry,
        }
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> StageDefinition {
        self.registry
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("fixture registry has no stage '{name}'"))
    }

    pub(crate) fn context<'a>(
        &'a self,
        stage: &'a StageDefinition,
        cache: &'a ArtifactCache,
        gateway: &'a dyn GenerationGateway,
    ) -> StageContext<'a> {
        StageContext::new(
            &self.key,
            &self.job_dir,
            &self.metadata,
            stage,
            &self.config,
            cache,
            gateway,
        )
    }

    #[must_use]
    pub fn orchestrator(&self, gateway: Arc<dyn GenerationGateway>) -> Orchestrator {
        Orchestrator::new(self.config.clone(), gateway).expect("fixture orchestrator")
    }

    /// Write a file relative to the job directory, creating parents.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.job_dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dirs");
        }
        std::fs::write(&path, content).expect("write fixture file");
    }

    #[must_use]
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.job_dir.join(rel))
            .unwrap_or_else(|e| panic!("read {rel}: {e}"))
    }
}

const ADJECTIVES: [&str; 12] = [
    "quiet", "northern", "early", "final", "hidden", "patient", "crowded", "distant", "careful",
    "sudden", "steady", "bright",
];
const NOUNS: [&str; 12] = [
    "harbour", "ledger", "council", "bridge", "archive", "market", "voyage", "garden", "workshop",
    "festival", "railway", "library",
];
const ENDINGS: [&str; 10] = [
    "shaped the season",
    "changed the plan",
    "drew a crowd",
    "set the tone",
    "opened new doors",
    "slowed the work",
    "raised questions",
    "settled the matter",
    "won support",
    "surprised everyone",
];

static NEXT_SENTENCE: AtomicUsize = AtomicUsize::new(0);

fn sentence(n: usize) -> String {
    let adjective = ADJECTIVES[n % ADJECTIVES.len()];
    let noun = NOUNS[(n / ADJECTIVES.len()) % NOUNS.len()];
    let ending = ENDINGS[(n / (ADJECTIVES.len() * NOUNS.len())) % ENDINGS.len()];
    format!("The {adjective} {noun} {ending}.")
}

/// Clean narration of at most `chars` counted characters.
///
/// At least two marker-separated segments, one line each, every sentence
/// complete. Sentences continue from the previous call, so two calls never
/// share a paragraph.
#[must_use]
pub fn prose(chars: usize, marker: &str) -> String {
    let segments = (chars / 500).max(2);
    let per_segment = chars / segments;
    let mut parts = Vec::with_capacity(segments);
    for _ in 0..segments {
        let mut line = String::new();
        let mut counted = 0usize;
        loop {
            let n = NEXT_SENTENCE.fetch_add(1, Ordering::Relaxed);
            let next = sentence(n);
            let size = next.chars().filter(|c| !c.is_whitespace()).count();
            if counted + size > per_segment {
                break;
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&next);
            counted += size;
        }
        parts.push(line);
    }
    join_segments(&parts, marker)
}
