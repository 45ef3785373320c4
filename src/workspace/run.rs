//! Turning a course runner descriptor into a concrete sandbox run.

use crate::course::{CourseManifest, ExerciseNode, RunnerDescriptor};
use crate::error::{EngineError, Result};
use crate::sandbox::{PathPolicy, ProcessRunner, RunSpec, SandboxRunner};
use std::path::Path;
use tracing::debug;

#[cfg(feature = "containers")]
use crate::sandbox::{ContainerRunner, ImageManager, NetworkPolicy, RuntimeClient, image_tag_for};

#[cfg(feature = "containers")]
const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Values substituted into runner templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders<'a> {
    /// Full `module/exercise` id
    pub id: &'a str,
    pub exercise: &'a str,
    pub module: &'a str,
}

impl<'a> Placeholders<'a> {
    pub fn for_node(node: &'a ExerciseNode) -> Self {
        Self {
            id: &node.id,
            exercise: &node.name,
            module: &node.module,
        }
    }

    /// Replace `{{id}}`, `{{exercise}}` and `{{module}}` verbatim.
    pub fn apply(&self, template: &str) -> String {
        template
            .replace("{{id}}", self.id)
            .replace("{{exercise}}", self.exercise)
            .replace("{{module}}", self.module)
    }

    /// Like [`Self::apply`], with every value quoted for a POSIX shell.
    pub fn apply_shell(&self, template: &str) -> String {
        let quote = |value: &str| shell_escape::escape(value.to_string().into()).into_owned();
        template
            .replace("{{id}}", &quote(self.id))
            .replace("{{exercise}}", &quote(self.exercise))
            .replace("{{module}}", &quote(self.module))
    }
}

/// A run ready to execute.
pub(crate) struct PreparedRun {
    pub spec: RunSpec,
    pub runner: SandboxRunner,
}

/// Build the run for `node` of the course checked out at `root`.
pub(crate) async fn prepare(
    root: &Path,
    manifest: &CourseManifest,
    node: &ExerciseNode,
    policy: PathPolicy,
) -> Result<PreparedRun> {
    let values = Placeholders::for_node(node);
    match &manifest.runner {
        RunnerDescriptor::Process {
            command,
            args,
            cwd,
            env,
        } => {
            let cwd = match cwd {
                Some(cwd) => root.join(values.apply(cwd)),
                None => root.to_path_buf(),
            };
            let args = args.iter().map(|a| values.apply(a)).collect();
            let mut spec = RunSpec::new(cwd, values.apply(command), args);
            spec.env.extend(env.clone());
            spec = spec.with_env("FORCE_COLOR", "1");
            debug!("Prepared process run for {}", node.id);
            Ok(PreparedRun {
                spec,
                runner: SandboxRunner::Process(ProcessRunner::new(policy)),
            })
        }
        #[cfg(feature = "containers")]
        RunnerDescriptor::DockerLocal {
            command,
            dockerfile,
            image_tag,
            network_access,
            env,
        } => {
            policy.check(root).map_err(|reason| EngineError::UnsafeSandboxPath {
                path: root.to_path_buf(),
                reason,
            })?;
            let client = RuntimeClient::connect().await?;
            let tag = image_tag.clone().unwrap_or_else(|| image_tag_for(&manifest.id));
            let dockerfile = root.join(dockerfile.as_deref().unwrap_or(DEFAULT_DOCKERFILE));
            ImageManager::new(client.clone())
                .ensure(&tag, &dockerfile, root)
                .await?;

            let network = if *network_access {
                NetworkPolicy::Bridged
            } else {
                NetworkPolicy::Isolated
            };
            let mut spec = RunSpec::shell(root, values.apply_shell(command)).with_network(network);
            spec.env.extend(env.clone());
            spec = spec.with_env("FORCE_COLOR", "1");
            debug!("Prepared container run for {} in {}", node.id, tag);
            Ok(PreparedRun {
                spec,
                runner: SandboxRunner::Container(ContainerRunner::new(client, tag, policy)),
            })
        }
        #[cfg(not(feature = "containers"))]
        RunnerDescriptor::DockerLocal { .. } => Err(EngineError::RunnerUnavailable(
            "this build has no container support; rebuild with the `containers` feature"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::NodeKind;
    use std::collections::BTreeMap;

    fn node() -> ExerciseNode {
        ExerciseNode {
            id: "01_intro/02 hello".to_string(),
            module: "01_intro".to_string(),
            name: "02 hello".to_string(),
            friendly_name: "hello".to_string(),
            kind: NodeKind::Exercise,
            has_quiz: false,
            difficulty: None,
            tags: Vec::new(),
            xp: None,
            prerequisites: Vec::new(),
        }
    }

    #[test]
    fn test_placeholders_replace_every_occurrence() {
        let node = node();
        let values = Placeholders::for_node(&node);
        assert_eq!(
            values.apply("run {{module}}/{{exercise}} --id {{id}} {{module}}"),
            "run 01_intro/02 hello --id 01_intro/02 hello 01_intro"
        );
    }

    #[test]
    fn test_shell_placeholders_are_quoted() {
        let node = node();
        let values = Placeholders::for_node(&node);
        assert_eq!(
            values.apply_shell("make test EX={{exercise}}"),
            "make test EX='02 hello'"
        );
    }

    #[tokio::test]
    async fn test_process_runner_spec() {
        let manifest = CourseManifest {
            id: "rust".to_string(),
            name: "Rust".to_string(),
            version: "1.0.0".to_string(),
            content: Default::default(),
            runner: RunnerDescriptor::Process {
                command: "cargo".to_string(),
                args: vec!["run".into(), "--".into(), "test".into(), "{{id}}".into()],
                cwd: Some("runner".to_string()),
                env: BTreeMap::from([("RUST_BACKTRACE".to_string(), "0".to_string())]),
            },
            setup: None,
            progression: None,
            exercises: BTreeMap::new(),
        };
        let root = Path::new("/tmp/course");
        let prepared = prepare(root, &manifest, &node(), PathPolicy::default())
            .await
            .unwrap();

        assert_eq!(prepared.spec.cwd, root.join("runner"));
        assert_eq!(prepared.spec.program, "cargo");
        assert_eq!(prepared.spec.args.last().unwrap(), "01_intro/02 hello");
        assert_eq!(prepared.spec.env.get("FORCE_COLOR").unwrap(), "1");
        assert_eq!(prepared.spec.env.get("RUST_BACKTRACE").unwrap(), "0");
        assert_eq!(prepared.runner.runner_type(), "process");
    }
}
