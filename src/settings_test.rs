use super::*;

/// # Safety
/// Env-mutating tests share one lock so they never interleave.
unsafe fn clear_board_env() {
    unsafe {
        for key in [
            "BOARD_REPO",
            "BOARD_API_BASE",
            "BOARD_CONFIG_ISSUE",
            "BOARD_POLL_INTERVAL_MS",
            "BOARD_SESSION_TIMEOUT_SECS",
            "BOARD_MAX_LOGIN_ATTEMPTS",
            "BOARD_LOGIN_WINDOW_SECS",
            "BOARD_MIN_PASSWORD_LEN",
            "BOARD_MAX_MESSAGE_LEN",
            "BOARD_REQUEST_TIMEOUT_SECS",
            "BOARD_CONNECT_TIMEOUT_SECS",
            "BOARD_PAGE_SIZE",
            "BOARD_ALLOW_BOOTSTRAP",
            "BOARD_STRICT_CONFIG_WRITES",
            "BOARD_SESSION_FILE",
            "GITHUB_TOKEN",
        ] {
            std::env::remove_var(key);
        }
    }
}

static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

// =============================================================================
// RepoRef
// =============================================================================

#[test]
fn repo_ref_parses_owner_and_name() {
    let repo: RepoRef = "octo/board".parse().unwrap();
    assert_eq!(repo.owner, "octo");
    assert_eq!(repo.name, "board");
    assert_eq!(repo.to_string(), "octo/board");
}

#[test]
fn repo_ref_trims_slashes_and_whitespace() {
    let repo: RepoRef = " /octo/board/ ".parse().unwrap();
    assert_eq!(repo.to_string(), "octo/board");
}

#[test]
fn repo_ref_rejects_missing_name() {
    assert!(matches!("octo".parse::<RepoRef>(), Err(SettingsError::InvalidRepo(_))));
    assert!(matches!("octo/".parse::<RepoRef>(), Err(SettingsError::InvalidRepo(_))));
}

#[test]
fn repo_ref_rejects_nested_path() {
    assert!("a/b/c".parse::<RepoRef>().is_err());
}

// =============================================================================
// from_env
// =============================================================================

#[test]
fn from_env_requires_repo() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_board_env() };

    let err = BoardSettings::from_env().unwrap_err();
    assert_eq!(err, SettingsError::Missing { var: "BOARD_REPO" });
}

#[test]
fn from_env_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_board_env();
        std::env::set_var("BOARD_REPO", "octo/board");
    }

    let settings = BoardSettings::from_env().unwrap();
    assert_eq!(settings, BoardSettings::for_repo("octo/board".parse().unwrap()));
    assert_eq!(settings.api_base, DEFAULT_API_BASE);
    assert_eq!(settings.config_issue, 1);
    assert!(settings.allow_bootstrap);
    assert!(settings.token.is_none());

    unsafe { clear_board_env() };
}

#[test]
fn from_env_parses_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_board_env();
        std::env::set_var("BOARD_REPO", "octo/board");
        std::env::set_var("BOARD_API_BASE", "https://ghe.example.test/api/v3/");
        std::env::set_var("BOARD_CONFIG_ISSUE", "7");
        std::env::set_var("BOARD_POLL_INTERVAL_MS", "250");
        std::env::set_var("BOARD_PAGE_SIZE", "500");
        std::env::set_var("BOARD_ALLOW_BOOTSTRAP", "false");
        std::env::set_var("GITHUB_TOKEN", "  ghp_abc  ");
    }

    let settings = BoardSettings::from_env().unwrap();
    assert_eq!(settings.api_base, "https://ghe.example.test/api/v3");
    assert_eq!(settings.config_issue, 7);
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.page_size, 100);
    assert!(!settings.allow_bootstrap);
    assert_eq!(settings.token.as_deref(), Some("ghp_abc"));

    unsafe { clear_board_env() };
}

#[test]
fn from_env_invalid_numbers_fall_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_board_env();
        std::env::set_var("BOARD_REPO", "octo/board");
        std::env::set_var("BOARD_SESSION_TIMEOUT_SECS", "soon");
        std::env::set_var("GITHUB_TOKEN", "   ");
    }

    let settings = BoardSettings::from_env().unwrap();
    assert_eq!(settings.session_timeout, Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS));
    assert!(settings.token.is_none());

    unsafe { clear_board_env() };
}
