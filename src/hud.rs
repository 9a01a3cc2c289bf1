use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{Event, EventSink, Host, SystemAction};

const HUD_TIMEOUT: Duration = Duration::from_millis(400);

/// Posts events to the dashboard. The dashboard may not be running; failures are dropped.
pub(crate) struct HudNotifier {
    url: String,
    agent: ureq::Agent,
}

impl HudNotifier {
    pub(crate) fn new(url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(HUD_TIMEOUT)
            .timeout_read(HUD_TIMEOUT)
            .timeout_write(HUD_TIMEOUT)
            .build();
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl EventSink for HudNotifier {
    fn emit(&self, event: Event) {
        if let Err(err) = self.agent.post(&self.url).send_json(event.to_json()) {
            debug!(kind = event.kind(), error = %err, "hud event dropped");
        }
    }
}

/// Host for the terminal binary: speech goes to stdout, everything else to platform tools.
pub(crate) struct ConsoleHost {
    speaker: String,
    exit_requested: AtomicBool,
}

impl ConsoleHost {
    pub(crate) fn new(speaker: &str) -> Self {
        Self {
            speaker: speaker.to_string(),
            exit_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }
}

fn spawn_detached(program: &str, args: &[&str]) -> bool {
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => true,
        Err(err) => {
            warn!(program, error = %err, "could not spawn");
            false
        }
    }
}

type Argv = (&'static str, &'static [&'static str]);

fn argv(program: &'static str, args: &'static [&'static str]) -> Argv {
    (program, args)
}

fn opener() -> Argv {
    if cfg!(target_os = "macos") {
        argv("open", &[])
    } else if cfg!(target_os = "windows") {
        argv("cmd", &["/C", "start", ""])
    } else {
        argv("xdg-open", &[])
    }
}

/// Command line for a system action on this platform, if one exists.
pub(crate) fn system_command(action: SystemAction) -> Option<Argv> {
    use SystemAction::*;
    if cfg!(target_os = "macos") {
        return match action {
            PlayPause => Some(argv("osascript", &["-e", "tell application \"Music\" to playpause"])),
            NextTrack => Some(argv("osascript", &["-e", "tell application \"Music\" to next track"])),
            PreviousTrack => Some(argv("osascript", &["-e", "tell application \"Music\" to previous track"])),
            StopMedia => Some(argv("osascript", &["-e", "tell application \"Music\" to stop"])),
            Mute => Some(argv("osascript", &["-e", "set volume with output muted"])),
            Unmute => Some(argv("osascript", &["-e", "set volume without output muted"])),
            VolumeUp => Some(argv(
                "osascript",
                &["-e", "set volume output volume ((output volume of (get volume settings)) + 2)"],
            )),
            VolumeDown => Some(argv(
                "osascript",
                &["-e", "set volume output volume ((output volume of (get volume settings)) - 2)"],
            )),
            Lock => Some(argv("pmset", &["displaysleepnow"])),
            Sleep => Some(argv("pmset", &["sleepnow"])),
            Shutdown => Some(argv("osascript", &["-e", "tell app \"System Events\" to shut down"])),
            Restart => Some(argv("osascript", &["-e", "tell app \"System Events\" to restart"])),
            CloseWindow | ExitAssistant => None,
        };
    }
    match action {
        PlayPause => Some(argv("playerctl", &["play-pause"])),
        NextTrack => Some(argv("playerctl", &["next"])),
        PreviousTrack => Some(argv("playerctl", &["previous"])),
        StopMedia => Some(argv("playerctl", &["stop"])),
        Mute => Some(argv("pactl", &["set-sink-mute", "@DEFAULT_SINK@", "1"])),
        Unmute => Some(argv("pactl", &["set-sink-mute", "@DEFAULT_SINK@", "0"])),
        VolumeUp => Some(argv("pactl", &["set-sink-volume", "@DEFAULT_SINK@", "+2%"])),
        VolumeDown => Some(argv("pactl", &["set-sink-volume", "@DEFAULT_SINK@", "-2%"])),
        CloseWindow => Some(argv("xdotool", &["getactivewindow", "windowclose"])),
        Lock => Some(argv("loginctl", &["lock-session"])),
        Sleep => Some(argv("systemctl", &["suspend"])),
        Shutdown => Some(argv("systemctl", &["poweroff"])),
        Restart => Some(argv("systemctl", &["reboot"])),
        ExitAssistant => None,
    }
}

/// Program name for an application key produced by the command table.
pub(crate) fn application_program(name: &str) -> &str {
    match name {
        "vscode" => "code",
        "calculator" if cfg!(target_os = "macos") => "Calculator",
        "calculator" => "gnome-calculator",
        "terminal" if cfg!(target_os = "macos") => "Terminal",
        "terminal" => "x-terminal-emulator",
        "chrome" if cfg!(target_os = "linux") => "google-chrome",
        "powershell" => "pwsh",
        other => other,
    }
}

impl Host for ConsoleHost {
    fn speak(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}: {text}", self.speaker);
        let _ = out.flush();
    }

    fn open_external_resource(&self, target: &str) -> bool {
        let (program, prefix) = opener();
        let mut args = prefix.to_vec();
        args.push(target);
        spawn_detached(program, &args)
    }

    fn launch_application(&self, name: &str) -> bool {
        let program = application_program(name);
        if cfg!(target_os = "macos") {
            spawn_detached("open", &["-a", program])
        } else {
            spawn_detached(program, &[])
        }
    }

    fn system_action(&self, action: SystemAction) -> bool {
        if action == SystemAction::ExitAssistant {
            info!("exit requested");
            self.exit_requested.store(true, Ordering::SeqCst);
            return true;
        }
        match system_command(action) {
            Some((program, args)) => spawn_detached(program, args),
            None => {
                warn!(%action, "system action unsupported on this platform");
                false
            }
        }
    }
}
