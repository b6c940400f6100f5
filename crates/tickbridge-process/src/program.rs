//! Programs: file-system lookup and executor instantiation.
//!
//! A [`FileSystem`] turns a path into a [`ProgramImage`]; the
//! [`ProgramRegistry`] turns the image's executor name into a running
//! [`Executor`]. Both are plain values passed to the launch handler, never
//! globals.

use crate::process::Executor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A launchable program as stored on a computer's file system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramImage {
    /// Path the program was resolved from.
    pub path: String,
    /// Name of the executor factory in the [`ProgramRegistry`].
    pub executor: String,
    /// Arguments handed to the factory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ProgramImage {
    pub fn new(path: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            executor: executor.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Path resolution, owned by the host game.
pub trait FileSystem: Send + Sync {
    /// Resolves `path` to a program, or `None` if nothing launchable is there.
    fn resolve(&self, path: &str) -> Option<ProgramImage>;
}

type Factory = Box<dyn Fn(&ProgramImage) -> Box<dyn Executor> + Send + Sync>;

/// Named executor factories.
#[derive(Default)]
pub struct ProgramRegistry {
    factories: HashMap<String, Factory>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register<F, E>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProgramImage) -> E + Send + Sync + 'static,
        E: Executor,
    {
        self.factories.insert(
            name.into(),
            Box::new(move |image| Box::new(factory(image)) as Box<dyn Executor>),
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds an executor for `image`, or `None` if its executor name is
    /// unknown.
    pub fn instantiate(&self, image: &ProgramImage) -> Option<Box<dyn Executor>> {
        let factory = self.factories.get(&image.executor)?;
        Some(factory(image))
    }
}

impl fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Pid, Step, TickContext};

    struct Countdown(u32);

    impl Executor for Countdown {
        fn update(&mut self, _: &TickContext) -> Step {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                Step::Stop
            } else {
                Step::Continue
            }
        }
    }

    #[test]
    fn instantiates_registered_executors() {
        let registry = ProgramRegistry::new().register("countdown", |image: &ProgramImage| {
            let ticks = image
                .args
                .first()
                .and_then(|a| a.parse().ok())
                .unwrap_or(1);
            Countdown(ticks)
        });

        let image = ProgramImage::new("/bin/countdown", "countdown").with_args(["2"]);
        let mut exec = registry.instantiate(&image).unwrap();
        let ctx = TickContext { pid: Pid(1), tick: 0 };
        assert_eq!(exec.update(&ctx), Step::Continue);
        assert_eq!(exec.update(&ctx), Step::Stop);

        assert!(registry
            .instantiate(&ProgramImage::new("/bin/x", "missing"))
            .is_none());
        assert_eq!(registry.names(), vec!["countdown"]);
    }

    #[test]
    fn image_serde_omits_empty_args() {
        let json = serde_json::to_value(ProgramImage::new("/bin/a", "a")).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "/bin/a", "executor": "a" }));
    }
}
