//! Effector backed by platform command-line tools.
//!
//! Linux drives input through `xdotool`, macOS through `cliclick`. URLs go
//! to the system handler through the `open` crate.

use async_trait::async_trait;
use deskrelay_core::{Action, Effector, EffectorError};

use crate::{command::CommandParts, shell::Platform};

/// How a planned command should be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run and wait for a zero exit status.
    Run(CommandParts),
    /// Start and leave running (GUI applications).
    Detach(CommandParts),
    /// Hand a URL or application name to the system handler.
    Open(String),
    /// Nothing to do.
    Skip,
}

/// Effector that shells out to platform tools.
#[derive(Debug, Clone)]
pub struct CommandEffector {
    platform: Platform,
}

impl Default for CommandEffector {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl CommandEffector {
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Work out the command for an action without running it.
    ///
    /// # Errors
    /// Returns error if the platform cannot perform the action.
    pub fn plan(&self, action: &Action) -> Result<Invocation, EffectorError> {
        match self.platform {
            Platform::Linux => Ok(plan_linux(action)),
            Platform::MacOs => plan_macos(action),
            Platform::Windows => plan_windows(action),
        }
    }
}

#[async_trait]
impl Effector for CommandEffector {
    async fn perform(&self, action: &Action) -> Result<(), EffectorError> {
        match self.plan(action)? {
            Invocation::Run(parts) => parts.run().await?,
            Invocation::Detach(parts) => parts.spawn_detached().await?,
            Invocation::Open(target) => open_target(target).await?,
            Invocation::Skip => {}
        }
        Ok(())
    }
}

async fn open_target(target: String) -> Result<(), EffectorError> {
    tracing::debug!(%target, "Opening with system handler");
    tokio::task::spawn_blocking(move || open::that(target))
        .await
        .map_err(|e| EffectorError::Other(format!("Opener task failed: {e}")))??;
    Ok(())
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

fn unsupported(platform: &str, action: &Action) -> EffectorError {
    EffectorError::Unsupported(format!("{} on {platform}", action.kind()))
}

fn plan_linux(action: &Action) -> Invocation {
    let xdotool = |args: Vec<String>| Invocation::Run(CommandParts::new("xdotool", args));

    match action {
        Action::OpenUrl { url } => Invocation::Open(with_scheme(url)),
        Action::OpenApp { app } => match shlex::split(app).filter(|p| !p.is_empty()) {
            Some(mut parts) => {
                let program = parts.remove(0);
                Invocation::Detach(CommandParts::new(program, parts))
            }
            None => Invocation::Detach(CommandParts::new(app.clone(), Vec::<String>::new())),
        },
        Action::KeyboardType { text } => xdotool(vec![
            "type".into(),
            "--delay".into(),
            "50".into(),
            "--".into(),
            text.clone(),
        ]),
        Action::KeyboardPress { .. } => {
            let chord = action.chord();
            let keysym: Vec<&str> = chord.iter().map(|k| xdotool_key(k)).collect();
            let keysym = keysym.join("+");
            xdotool(vec!["key".into(), "--".into(), keysym])
        }
        Action::MouseClick { x, y } => xdotool(vec![
            "mousemove".into(),
            x.to_string(),
            y.to_string(),
            "click".into(),
            "1".into(),
        ]),
        Action::MouseMove { x, y } => xdotool(vec!["mousemove".into(), x.to_string(), y.to_string()]),
        Action::Scroll { amount } => {
            if *amount == 0 {
                return Invocation::Skip;
            }
            // Buttons 4/5 are wheel up/down.
            let button = if *amount > 0 { "5" } else { "4" };
            xdotool(vec![
                "click".into(),
                "--repeat".into(),
                amount.unsigned_abs().to_string(),
                button.into(),
            ])
        }
        Action::Wait { .. } => Invocation::Skip,
    }
}

fn xdotool_key(key: &str) -> &str {
    match key {
        "cmd" | "command" | "super" | "win" | "meta" => "super",
        "ctrl" | "control" => "ctrl",
        "alt" | "option" => "alt",
        "shift" => "shift",
        "enter" | "return" => "Return",
        "tab" => "Tab",
        "esc" | "escape" => "Escape",
        "space" => "space",
        "backspace" => "BackSpace",
        "delete" | "del" => "Delete",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "home" => "Home",
        "end" => "End",
        "pageup" => "Prior",
        "pagedown" => "Next",
        "f1" => "F1",
        "f2" => "F2",
        "f3" => "F3",
        "f4" => "F4",
        "f5" => "F5",
        "f6" => "F6",
        "f7" => "F7",
        "f8" => "F8",
        "f9" => "F9",
        "f10" => "F10",
        "f11" => "F11",
        "f12" => "F12",
        other => other,
    }
}

fn plan_macos(action: &Action) -> Result<Invocation, EffectorError> {
    let cliclick = |args: Vec<String>| -> Result<Invocation, EffectorError> {
        Ok(Invocation::Run(CommandParts::new("cliclick", args)))
    };

    match action {
        Action::OpenUrl { url } => Ok(Invocation::Open(with_scheme(url))),
        Action::OpenApp { app } => Ok(Invocation::Run(CommandParts::new(
            "open",
            ["-a".to_string(), app.clone()],
        ))),
        Action::KeyboardType { text } => cliclick(vec![format!("t:{text}")]),
        Action::KeyboardPress { .. } => cliclick(cliclick_chord(&action.chord())),
        Action::MouseClick { x, y } => cliclick(vec![format!("c:{x},{y}")]),
        Action::MouseMove { x, y } => cliclick(vec![format!("m:{x},{y}")]),
        Action::Scroll { .. } => Err(unsupported("macOS", action)),
        Action::Wait { .. } => Ok(Invocation::Skip),
    }
}

fn cliclick_modifier(key: &str) -> Option<&'static str> {
    match key {
        "cmd" | "command" | "super" | "meta" => Some("cmd"),
        "ctrl" | "control" => Some("ctrl"),
        "alt" | "option" => Some("alt"),
        "shift" => Some("shift"),
        "fn" => Some("fn"),
        _ => None,
    }
}

fn cliclick_named_key(key: &str) -> Option<&'static str> {
    match key {
        "enter" | "return" => Some("return"),
        "tab" => Some("tab"),
        "esc" | "escape" => Some("esc"),
        "space" => Some("space"),
        "backspace" | "delete" | "del" => Some("delete"),
        "up" => Some("arrow-up"),
        "down" => Some("arrow-down"),
        "left" => Some("arrow-left"),
        "right" => Some("arrow-right"),
        "home" => Some("home"),
        "end" => Some("end"),
        "pageup" => Some("page-up"),
        "pagedown" => Some("page-down"),
        _ => None,
    }
}

fn cliclick_chord(keys: &[String]) -> Vec<String> {
    let modifiers: Vec<&str> = keys.iter().filter_map(|k| cliclick_modifier(k)).collect();
    let mut args = Vec::new();
    if !modifiers.is_empty() {
        args.push(format!("kd:{}", modifiers.join(",")));
    }
    for key in keys.iter().filter(|k| cliclick_modifier(k).is_none()) {
        match cliclick_named_key(key) {
            Some(named) => args.push(format!("kp:{named}")),
            None => args.push(format!("t:{key}")),
        }
    }
    if !modifiers.is_empty() {
        args.push(format!("ku:{}", modifiers.join(",")));
    }
    args
}

fn plan_windows(action: &Action) -> Result<Invocation, EffectorError> {
    match action {
        Action::OpenUrl { url } => Ok(Invocation::Open(with_scheme(url))),
        Action::OpenApp { app } => Ok(Invocation::Open(app.clone())),
        Action::Wait { .. } => Ok(Invocation::Skip),
        _ => Err(unsupported("Windows", action)),
    }
}
