//! Built-in evaluation scenarios

use std::path::PathBuf;

use crate::error::{EvalError, Result};
use crate::eval::Step;
use crate::handoff::WORKDIR_KEY;
use crate::runner::EvalRunner;

const STRAWBERRY: &str = "I'm a strawberry!";

/// A named, ready-to-run list of steps
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    build: fn(&EvalRunner) -> Vec<Step>,
}

impl Scenario {
    /// Steps for this scenario, parameterised by the runner's target
    pub fn steps(&self, runner: &EvalRunner) -> Vec<Step> {
        (self.build)(runner)
    }
}

static SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "trivy-scan",
        description: "Publish the sample app to ttl.sh, then scan the image for vulnerabilities",
        build: trivy_scan,
    },
    Scenario {
        name: "npm-audit",
        description: "Run npm audit against the target project and expose the JSON report",
        build: npm_audit,
    },
    Scenario {
        name: "read-implicit-vars",
        description: "Use string inputs without having them expanded in the prompt",
        build: read_implicit_vars,
    },
];

/// All registered scenarios
pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

/// Look up a scenario by name
pub fn find(name: &str) -> Result<&'static Scenario> {
    SCENARIOS
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| EvalError::UnknownScenario(name.to_string()))
}

fn trivy_scan(_runner: &EvalRunner) -> Vec<Step> {
    vec![
        Step::new("publish the hello dagger app")
            .named("publish")
            .with_env(|env| env.with_string_output("imageRef", "Published docker image"))
            .with_check(|_ctx, t, env| {
                let image_ref = env.output("imageRef");
                let image = t.require_ok(image_ref.as_string(), "imageRef")?;
                t.log(format_args!("ImageRef: {}", image));
                t.require_contains(image, "ttl.sh/hello-dagger-", "REF")
            }),
        Step::new("check for its vulnerabilities")
            .named("scan")
            .with_env(|env| env.with_string_output("trivyOutput", "Trivy scan output"))
            .with_check(|_ctx, t, env| {
                let output = env.output("trivyOutput");
                let text = t.require_ok(output.as_string(), "trivyOutput")?;
                t.require_contains(text, "Vulnerability", "VULNERABILITY")
            }),
    ]
}

fn npm_audit(runner: &EvalRunner) -> Vec<Step> {
    let project = runner.target.clone().unwrap_or_else(|| PathBuf::from("."));

    vec![Step::new(
        r#"In the Node project at $workdir, run "npm install --audit=false" followed by "npm audit --json". Expose the JSON printed by npm audit as $audit."#,
    )
    .named("audit")
    .with_env(move |env| {
        env.with_directory_input(WORKDIR_KEY, project.clone(), "Node project to audit.")
            .with_string_output("audit", "JSON output of npm audit.")
    })
    .with_check(|_ctx, t, env| {
        let audit = env.output("audit");
        let raw = t.require_ok(audit.as_string(), "audit")?;
        let parsed: serde_json::Value =
            t.require_ok(serde_json::from_str(raw), "audit output is not JSON")?;
        t.require(
            parsed.get("vulnerabilities").is_some(),
            "npm audit JSON missing 'vulnerabilities'",
        )
    })]
}

fn read_implicit_vars(_runner: &EvalRunner) -> Vec<Step> {
    vec![Step::new(
        "I gave you some content and a filename. Write the content to the specified file, then read the file back and expose what you read as $fileContent.",
    )
    .named("write and read back")
    .with_env(|env| {
        env.with_string_input("myContent", STRAWBERRY, "The content to write.")
            .with_string_input("desiredName", "/weird.txt", "The name of the file to write to.")
            .with_string_output("fileContent", "The content read back from the file.")
    })
    .with_check(|_ctx, t, env| {
        let content = env.output("fileContent");
        let content = t.require_ok(content.as_string(), "fileContent")?;
        t.require_eq(STRAWBERRY, content, "file content")
    })]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::HandleKind;
    use crate::context::TurnContext;
    use crate::environment::Environment;
    use crate::recorder::{CheckResult, Halt, Recorder};

    fn check_step(step: &Step, env: &Environment) -> (CheckResult, Recorder) {
        let mut t = Recorder::new("scenario");
        let check = step.check().expect("scenario steps have checks");
        let result = check(&TurnContext::new(), &mut t, env);
        (result, t)
    }

    #[test]
    fn test_find() {
        assert_eq!(find("trivy-scan").unwrap().name, "trivy-scan");
        assert!(matches!(find("nope"), Err(EvalError::UnknownScenario(_))));
        assert_eq!(all().len(), 3);
    }

    #[test]
    fn test_trivy_scan_checks() {
        let steps = find("trivy-scan").unwrap().steps(&EvalRunner::new("m"));
        assert_eq!(steps.len(), 2);

        let env = steps[0].mutator().unwrap()(&Environment::new())
            .with_output_value("imageRef", "ttl.sh/hello-dagger-77", "");
        let (result, t) = check_step(&steps[0], &env);
        assert_eq!(result, Ok(()));
        assert!(t.logs().contains("ImageRef: ttl.sh/hello-dagger-77"));

        let env = env.with_output_value("trivyOutput", "no findings", "");
        let (result, t) = check_step(&steps[1], &env);
        assert_eq!(result, Err(Halt::Failed));
        assert!(t.logs().contains("VULNERABILITY"));
    }

    #[test]
    fn test_npm_audit_binds_workdir() {
        let runner = EvalRunner::new("m").with_target("/projects/hello");
        let steps = find("npm-audit").unwrap().steps(&runner);
        let env = steps[0].mutator().unwrap()(&Environment::new());

        let workdir = env.input(WORKDIR_KEY);
        let handle = workdir.as_handle(HandleKind::Directory).unwrap();
        assert_eq!(handle.reference(), std::path::Path::new("/projects/hello"));

        let good = env.with_output_value("audit", r#"{"vulnerabilities": {}}"#, "");
        assert_eq!(check_step(&steps[0], &good).0, Ok(()));

        let bad = env.with_output_value("audit", r#"{"auditReportVersion": 2}"#, "");
        assert_eq!(check_step(&steps[0], &bad).0, Err(Halt::Failed));

        let garbage = env.with_output_value("audit", "npm ERR!", "");
        let (result, t) = check_step(&steps[0], &garbage);
        assert_eq!(result, Err(Halt::Failed));
        assert!(t.logs().starts_with("audit output is not JSON"));
    }

    #[test]
    fn test_read_implicit_vars() {
        let steps = find("read-implicit-vars").unwrap().steps(&EvalRunner::new("m"));
        let env = steps[0].mutator().unwrap()(&Environment::new());
        assert_eq!(env.input("desiredName").as_string().unwrap(), "/weird.txt");

        let env = env.with_output_value("fileContent", STRAWBERRY, "");
        assert_eq!(check_step(&steps[0], &env).0, Ok(()));
    }
}
