//! Interactive project setup

use crate::{CoreError, KeyPurpose, Keypair, Prompter, Result, SshTrustManager};
use devbox_config::{is_valid_container_name, validate_username, DevboxConfig, EditorKind, EnvFile, ProjectPaths};
use devbox_provider::ProcessRunner;
use std::sync::Arc;

/// Invalid answers accepted before giving up on a question
const MAX_ATTEMPTS: usize = 3;

/// What setup produced
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub config: DevboxConfig,
    pub container_key: Keypair,
    /// Present when GitHub access was enabled; the public half must be added to GitHub
    pub github_key: Option<Keypair>,
    pub token_saved: bool,
}

/// Ask for the project settings, then write config, env file and keys
///
/// `current` supplies the defaults offered for every question.
pub async fn run_setup(
    current: DevboxConfig,
    paths: &ProjectPaths,
    prompter: &dyn Prompter,
    runner: Arc<dyn ProcessRunner>,
) -> Result<SetupOutcome> {
    let mut config = current;

    config.container.name = ask_validated(
        prompter,
        "Container name",
        &config.container.name,
        |name| {
            if is_valid_container_name(name) {
                Ok(name.to_string())
            } else {
                Err("use letters, digits, '_', '.' or '-', starting with a letter or digit".into())
            }
        },
    )?;

    config.container.user = ask_validated(prompter, "Container user", &config.container.user, |user| {
        validate_username(user).map(|_| user.to_string())
    })?;

    let port = ask_validated(prompter, "SSH port", &config.ssh.port.to_string(), |raw| {
        match raw.parse::<u16>() {
            Ok(0) | Err(_) => Err("enter a port between 1 and 65535".into()),
            Ok(port) => Ok(port),
        }
    })?;
    config.ssh.port = port;

    let editors: Vec<String> = EditorKind::ALL
        .iter()
        .map(|k| k.profile().display_name.to_string())
        .collect();
    let current_editor = EditorKind::ALL
        .iter()
        .position(|k| *k == config.editor.kind)
        .unwrap_or(0);
    let choice = prompter.select("Editor", &editors, current_editor)?;
    config.editor.kind = EditorKind::ALL
        .get(choice)
        .copied()
        .ok_or_else(|| CoreError::Prompt(format!("no editor at index {}", choice)))?;

    config.git.name = optional(ask_validated(
        prompter,
        "Git user name (empty to skip)",
        config.git.name.as_deref().unwrap_or_default(),
        |name| Ok(name.to_string()),
    )?);
    config.git.email = optional(ask_validated(
        prompter,
        "Git email (empty to skip)",
        config.git.email.as_deref().unwrap_or_default(),
        |email| {
            if email.is_empty() || (email.contains('@') && !email.contains(char::is_whitespace)) {
                Ok(email.to_string())
            } else {
                Err("not an email address".into())
            }
        },
    )?);

    config.github.enabled = prompter.confirm(
        "Create an SSH key for GitHub access from the container?",
        config.github.enabled,
    )?;
    let token = prompter.password("GitHub token (optional, leave empty to skip)", true)?;

    config.validate()?;
    config.save(paths)?;
    tracing::info!("Wrote {:?}", paths.config_file());

    let mut env = EnvFile::from_config(&config, paths);
    let token = token.trim();
    if !token.is_empty() {
        env.set("GITHUB_TOKEN", token);
    }
    env.write(&paths.env_file())?;

    let ssh = SshTrustManager::new(&config, paths, runner)?;
    let container_key = ssh.ensure_keypair(KeyPurpose::Container, &config).await?;
    let github_key = if config.github.enabled {
        Some(ssh.ensure_keypair(KeyPurpose::GitHub, &config).await?)
    } else {
        None
    };

    Ok(SetupOutcome {
        config,
        container_key,
        github_key,
        token_saved: !token.is_empty(),
    })
}

fn optional(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Ask until `validate` accepts the answer, at most [`MAX_ATTEMPTS`] times
fn ask_validated<T>(
    prompter: &dyn Prompter,
    message: &str,
    default: &str,
    validate: impl Fn(&str) -> std::result::Result<T, String>,
) -> Result<T> {
    let default = (!default.is_empty()).then_some(default);
    let mut last_error = String::new();

    for _ in 0..MAX_ATTEMPTS {
        let answer = match default {
            Some(d) => prompter.input(message, Some(d))?,
            None => prompter.input(message, Some(""))?,
        };
        match validate(answer.trim()) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!("{}: {}", message, e);
                last_error = e;
            }
        }
    }

    Err(CoreError::Prompt(format!(
        "{}: {} (gave up after {} attempts)",
        message, last_error, MAX_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[tokio::test]
    async fn test_setup_writes_config_env_and_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(tmp.path());
        let prompter = ScriptedPrompter::new()
            .input_with("work")
            .input_with("dev")
            .input_with("2200")
            .select_with(1)
            .input_with("Ada Lovelace")
            .input_with("ada@example.com")
            .confirm_with(true)
            .password_with("ghp_secret");

        let outcome = run_setup(DevboxConfig::default(), &paths, &prompter, Arc::new(MockRunner::new()))
            .await
            .unwrap();

        assert_eq!(outcome.config.container.name, "work");
        assert_eq!(outcome.config.ssh.port, 2200);
        assert_eq!(outcome.config.editor.kind, EditorKind::Cursor);
        assert!(outcome.github_key.is_some());
        assert!(outcome.token_saved);

        let saved = DevboxConfig::load(&paths).unwrap();
        assert_eq!(saved, outcome.config);

        let env = EnvFile::parse(&std::fs::read_to_string(paths.env_file()).unwrap());
        assert_eq!(env.get("GITHUB_TOKEN"), Some("ghp_secret"));
        assert_eq!(env.get("DEVBOX_SSH_PORT"), Some("2200"));
        assert_eq!(env.get("GIT_USER_EMAIL"), Some("ada@example.com"));

        assert!(outcome.container_key.private_path.is_file());
        assert!(paths.keys_dir().join("github_ed25519.pub").is_file());
    }

    #[tokio::test]
    async fn test_setup_retries_invalid_answers() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(tmp.path());
        let prompter = ScriptedPrompter::new()
            .input_with("-bad name")
            .input_with("good")
            .input_with("root;id")
            .input_with("developer")
            .input_with("70000")
            .input_with("2222");

        let outcome = run_setup(DevboxConfig::default(), &paths, &prompter, Arc::new(MockRunner::new()))
            .await
            .unwrap();

        assert_eq!(outcome.config.container.name, "good");
        assert_eq!(outcome.config.container.user, "developer");
        assert!(outcome.config.git.name.is_none());
        assert!(outcome.github_key.is_none());
        assert!(!outcome.token_saved);
    }

    #[tokio::test]
    async fn test_setup_gives_up_after_three_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(tmp.path());
        let prompter = ScriptedPrompter::new()
            .input_with("!")
            .input_with("?")
            .input_with("*");

        let err = run_setup(DevboxConfig::default(), &paths, &prompter, Arc::new(MockRunner::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Prompt(_)));
        assert!(!paths.config_file().exists());
    }

    #[tokio::test]
    async fn test_rerun_keeps_existing_keys_and_token() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(tmp.path());
        let runner = MockRunner::new();
        let first = ScriptedPrompter::new().password_with("ghp_keep");
        let outcome = run_setup(DevboxConfig::default(), &paths, &first, Arc::new(runner.clone()))
            .await
            .unwrap();
        let key_before = std::fs::read(&outcome.container_key.private_path).unwrap();

        let second = run_setup(outcome.config.clone(), &paths, &ScriptedPrompter::new(), Arc::new(runner))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&second.container_key.private_path).unwrap(), key_before);
        let env = EnvFile::parse(&std::fs::read_to_string(paths.env_file()).unwrap());
        assert_eq!(env.get("GITHUB_TOKEN"), Some("ghp_keep"));
    }
}
