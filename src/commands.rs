//! Built-in voice commands.
//!
//! `trigger_table` is order-significant: the dispatcher fires the first rule whose pattern
//! matches and whose capability tag passes the safety gate.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Local, TimeZone};
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;

use crate::{
    CapabilityTag, CommandError, ConfirmationRequest, DispatchContext, GuardedAction,
    HandlerOutcome, SystemAction, env_optional,
};

pub(crate) type ExecuteFn = fn(&str, &DispatchContext) -> Result<HandlerOutcome, CommandError>;
pub(crate) type GuardFn = fn(&str) -> Result<Option<ConfirmationRequest>, CommandError>;

pub(crate) enum Handler {
    Execute(ExecuteFn),
    /// Dangerous rules only describe what to confirm; the action runs in `resolve_guarded`.
    Confirm(GuardFn),
}

pub(crate) struct TriggerRule {
    pub(crate) name: &'static str,
    pub(crate) pattern: Regex,
    pub(crate) tag: CapabilityTag,
    pub(crate) handler: Handler,
}

impl TriggerRule {
    fn informational(name: &'static str, pattern: &str, f: ExecuteFn) -> Result<Self, regex::Error> {
        Self::build(name, pattern, CapabilityTag::Informational, Handler::Execute(f))
    }

    fn action(name: &'static str, pattern: &str, f: ExecuteFn) -> Result<Self, regex::Error> {
        Self::build(name, pattern, CapabilityTag::Action, Handler::Execute(f))
    }

    fn dangerous(name: &'static str, pattern: &str, g: GuardFn) -> Result<Self, regex::Error> {
        Self::build(name, pattern, CapabilityTag::Dangerous, Handler::Confirm(g))
    }

    fn build(
        name: &'static str,
        pattern: &str,
        tag: CapabilityTag,
        handler: Handler,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            pattern: Regex::new(&format!("(?i){pattern}"))?,
            tag,
            handler,
        })
    }
}

pub(crate) fn trigger_table() -> Result<Vec<TriggerRule>, regex::Error> {
    Ok(vec![
        TriggerRule::informational("coin", r"\b(flip (a )?coin|coin toss|heads or tails)\b", coin)?,
        TriggerRule::informational("die", r"\b(roll (a )?d\d+|roll (a )?die|roll (a )?dice)\b", die)?,
        TriggerRule::informational("choose", r"\b(pick|choose)\s+(between|from)\s+.+", choose)?,
        TriggerRule::informational("time", r"\b(what'?s the time|tell me the time|the time|time)\b", time)?,
        TriggerRule::informational("date", r"\b(what'?s the date|what day is it|date)\b", date)?,
        TriggerRule::action(
            "open_site",
            r"\b(open|go to)\b.*\b(gmail|youtube|reddit|drive)\b|\b(open|go to) https?://",
            open_site,
        )?,
        TriggerRule::action("web_search_page", r"\b(search the web for|search|google|look up)\b", web_search_page)?,
        TriggerRule::action("youtube_search", r"\b(youtube|yt)\b", youtube_search)?,
        TriggerRule::action(
            "special_folder",
            r"\bopen (the )?(downloads?|documents?|pictures?|photos?|music|videos?|desktop|workspace)( folder)?\b",
            special_folder,
        )?,
        TriggerRule::action("open_app", r"\b(open|launch|start)\b", open_app)?,
        TriggerRule::action("media", r"\b(play|pause|resume|next|skip|previous|prev|back|stop)\b", media)?,
        TriggerRule::action("volume", r"\b(volume|mute|unmute|louder|quieter)\b", volume)?,
        TriggerRule::action("close_window", r"\b(close|exit|quit)\b.*\b(window|app|application)\b", close_window)?,
        TriggerRule::action("lock", r"\block (the )?(pc|computer|screen|workstation)\b", lock)?,
        TriggerRule::action("sleep", r"\b(sleep now|go to sleep|sleep the (pc|computer))\b", sleep)?,
        TriggerRule::dangerous("power", r"\b(shut ?down|power off|restart|reboot)\b", power)?,
        TriggerRule::dangerous("clear_notes", r"\b(clear|erase|delete)\s+(my |all )?notes\b", clear_notes)?,
        TriggerRule::action("notes", r"\b(note|remember|take a note|add note|open notes|show notes)\b", notes)?,
        TriggerRule::informational(
            "smalltalk",
            r"\b(how are you|how's it going|thank you|thanks|what is your name|who are you|good (morning|afternoon|evening))\b",
            smalltalk,
        )?,
        TriggerRule::action("maps", r"\b(navigate|directions|maps|route)\b", maps)?,
        TriggerRule::dangerous("exit", r"\b(exit|quit|close jarvis|shut down jarvis)\b", exit)?,
    ])
}

/// Run a confirmed guarded action.
pub(crate) fn resolve_guarded(
    action: GuardedAction,
    ctx: &DispatchContext,
) -> Result<HandlerOutcome, CommandError> {
    match action {
        GuardedAction::Shutdown => {
            ctx.host.system_action(SystemAction::Shutdown);
            reply("Shutting down, sir.")
        }
        GuardedAction::Restart => {
            ctx.host.system_action(SystemAction::Restart);
            reply("Restarting, sir.")
        }
        GuardedAction::ClearNotes => {
            let path = ctx.notes_path();
            if path.exists() {
                fs::write(&path, "")?;
            }
            reply("Cleared, sir.")
        }
        GuardedAction::ExitAssistant => {
            ctx.host.system_action(SystemAction::ExitAssistant);
            reply("Standing down, sir.")
        }
    }
}

fn reply(text: impl Into<String>) -> Result<HandlerOutcome, CommandError> {
    Ok(HandlerOutcome::Reply(text.into()))
}

// Handler patterns, compiled on first use. All are literals.
fn pattern(src: &str) -> Regex {
    Regex::new(&format!("(?i){src}")).unwrap()
}

static DIE_SIDES: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bd(\d+)\b"));
static CHOICE_TAIL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?:between|from)\s+(.+)"));
static CHOICE_SPLIT: LazyLock<Regex> = LazyLock::new(|| pattern(r"\s*(?:,| or | / )\s*"));
static EXPLICIT_URL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?:open|go to)\s+(https?://\S+)"));
static SEARCH_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(?:search the web for|search|google|look up)\s+(?:for\s+)?(.+)")
});
static YOUTUBE_QUERY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(?:youtube|yt)\s+(?:for\s+)?(.+)"));
static FOLDER_WORD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\bopen (?:the )?(downloads?|documents?|pictures?|photos?|music|videos?|desktop|workspace)\b")
});
static APP_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(?:open|launch|start)\b\s+([a-z0-9 ._-]+)"));
static MEDIA_PLAY: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(play|pause|resume)\b"));
static MEDIA_NEXT: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(next|skip)\b"));
static MEDIA_PREVIOUS: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(previous|prev|back)\b"));
static MEDIA_STOP: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bstop\b"));
static MUTE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(mute|silence)\b"));
static UNMUTE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bunmute\b"));
static VOLUME_UP: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(volume|sound)\b.*\b(up|increase|higher|louder)\b|\blouder\b")
});
static VOLUME_DOWN: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(volume|sound)\b.*\b(down|decrease|lower|quieter)\b|\bquieter\b")
});
static SHUTDOWN: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(shut ?down|power off)\b"));
static RESTART: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(restart|reboot)\b"));
static SHOW_NOTES: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(show|open)\s+notes\b"));
static NOTE_BODY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(?:take a note|add note|note)\b\s*(?:that\s+)?(.+)"));
static HOW_ARE_YOU: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(how are you|how's it going)\b"));
static THANKS: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(thank you|thanks)\b"));
static WHO_ARE_YOU: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(what is your name|who are you)\b"));
static GREETING: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bgood (morning|afternoon|evening)\b"));
static DESTINATION: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(?:navigate|directions|maps|route)\s+(?:to\s+)?(.+)"));

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn open_url(ctx: &DispatchContext, url: &str) {
    if !ctx.host.open_external_resource(url) {
        tracing::warn!(url, "host could not open url");
    }
}

fn coin(_text: &str, _ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let side = if rand::thread_rng().gen_bool(0.5) { "Heads" } else { "Tails" };
    reply(format!("{side}, sir."))
}

pub(crate) fn die_sides(text: &str) -> u32 {
    let sides = capture(&DIE_SIDES, text)
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(6);
    if (2..=1000).contains(&sides) { sides } else { 6 }
}

fn die(text: &str, _ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let sides = die_sides(text);
    let roll = rand::thread_rng().gen_range(1..=sides);
    reply(format!("{roll}, on a d{sides}, sir."))
}

pub(crate) fn choice_options(text: &str) -> Vec<String> {
    let Some(tail) = capture(&CHOICE_TAIL, text) else {
        return Vec::new();
    };
    CHOICE_SPLIT
        .split(&tail)
        .map(|o| o.trim().trim_end_matches(['.', '?', '!']).to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

fn choose(text: &str, _ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let options = choice_options(text);
    if options.len() < 2 {
        return Ok(HandlerOutcome::Declined);
    }
    match options.choose(&mut rand::thread_rng()) {
        Some(pick) => reply(format!("{pick}, sir.")),
        None => Ok(HandlerOutcome::Declined),
    }
}

pub(crate) fn spoken_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let clock = at.format("%I:%M %p").to_string();
    format!("It is {}, sir.", clock.trim_start_matches('0'))
}

pub(crate) fn spoken_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    at.format("Today is %A, %B %d, %Y, sir.").to_string()
}

fn time(_text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    reply(spoken_time(&ctx.now().with_timezone(&Local)))
}

fn date(_text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    reply(spoken_date(&ctx.now().with_timezone(&Local)))
}

static SITES: LazyLock<Vec<(Regex, &str, &str)>> = LazyLock::new(|| {
    [
        ("gmail", "https://mail.google.com", "Gmail, sir."),
        ("youtube", "https://youtube.com", "YouTube, sir."),
        ("reddit", "https://reddit.com", "Reddit, sir."),
        ("drive", "https://drive.google.com", "Drive, sir."),
    ]
    .into_iter()
    .map(|(word, url, answer)| (pattern(&format!(r"\b{word}\b")), url, answer))
    .collect()
});

fn open_site(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    for (word, url, answer) in SITES.iter() {
        if word.is_match(text) {
            open_url(ctx, url);
            return reply(*answer);
        }
    }
    if let Some(url) = capture(&EXPLICIT_URL, text) {
        open_url(ctx, &url);
        return reply("At once, sir.");
    }
    Ok(HandlerOutcome::Declined)
}

fn web_search_page(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let Some(query) = capture(&SEARCH_QUERY, text) else {
        return Ok(HandlerOutcome::Declined);
    };
    open_url(
        ctx,
        &format!("https://www.google.com/search?q={}", urlencoding::encode(&query)),
    );
    reply(format!("Searching for {query}, sir."))
}

fn youtube_search(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let Some(query) = capture(&YOUTUBE_QUERY, text) else {
        return Ok(HandlerOutcome::Declined);
    };
    open_url(
        ctx,
        &format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(&query)
        ),
    );
    reply(format!("YouTube search for {query}, sir."))
}

fn home_dir() -> Option<PathBuf> {
    env_optional("HOME")
        .or_else(|| env_optional("USERPROFILE"))
        .map(PathBuf::from)
}

pub(crate) fn special_folder_path(word: &str, ctx: &DispatchContext) -> Option<PathBuf> {
    let sub = match word {
        "workspace" => return Some(ctx.base_dir.clone()),
        "download" | "downloads" => "Downloads",
        "document" | "documents" => "Documents",
        "picture" | "pictures" | "photo" | "photos" => "Pictures",
        "music" => "Music",
        "video" | "videos" => "Videos",
        "desktop" => "Desktop",
        _ => return None,
    };
    home_dir().map(|home| home.join(sub))
}

fn special_folder(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let word = capture(&FOLDER_WORD, text);
    let Some(path) = word.and_then(|w| special_folder_path(&w.to_lowercase(), ctx)) else {
        return Ok(HandlerOutcome::Declined);
    };
    if ctx.host.open_external_resource(&path.to_string_lossy()) {
        reply("Opened, sir.")
    } else {
        reply("Apologies, sir. I couldn't open that folder.")
    }
}

const KNOWN_APPS: &[(&str, &str)] = &[
    ("visual studio code", "vscode"),
    ("vscode", "vscode"),
    ("calculator", "calculator"),
    ("calc", "calculator"),
    ("notepad", "notepad"),
    ("terminal", "terminal"),
    ("powershell", "powershell"),
    ("cmd", "terminal"),
    ("spotify", "spotify"),
    ("discord", "discord"),
    ("chrome", "chrome"),
    ("firefox", "firefox"),
    ("edge", "edge"),
];

/// Known application patterns, longest spoken name first.
static KNOWN_APP_PATTERNS: LazyLock<Vec<(Regex, &str)>> = LazyLock::new(|| {
    let mut known = KNOWN_APPS.to_vec();
    known.sort_by_key(|(spoken, _)| std::cmp::Reverse(spoken.len()));
    known
        .into_iter()
        .map(|(spoken, app)| (pattern(&format!(r"\b{}\b", regex::escape(spoken))), app))
        .collect()
});

/// Application to launch for the words after open/launch/start.
pub(crate) fn app_for_request(text: &str) -> Option<String> {
    let segment = capture(&APP_SEGMENT, text)?.to_lowercase();
    KNOWN_APP_PATTERNS
        .iter()
        .find(|(spoken, _)| spoken.is_match(&segment))
        .map(|(_, app)| app.to_string())
        .or_else(|| segment.split_whitespace().last().map(str::to_string))
}

fn open_app(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let Some(app) = app_for_request(text) else {
        return Ok(HandlerOutcome::Declined);
    };
    if ctx.host.launch_application(&app) {
        reply("Complete, sir.")
    } else {
        reply(format!("Apologies, sir. I couldn't open {app}."))
    }
}

fn media(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let (action, answer) = if MEDIA_PLAY.is_match(text) {
        (SystemAction::PlayPause, "Very well, sir.")
    } else if MEDIA_NEXT.is_match(text) {
        (SystemAction::NextTrack, "Next, sir.")
    } else if MEDIA_PREVIOUS.is_match(text) {
        (SystemAction::PreviousTrack, "Previous, sir.")
    } else if MEDIA_STOP.is_match(text) {
        (SystemAction::StopMedia, "Stopped, sir.")
    } else {
        return Ok(HandlerOutcome::Declined);
    };
    ctx.host.system_action(action);
    reply(answer)
}

const VOLUME_STEPS: usize = 5;

fn volume(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    if MUTE.is_match(text) {
        ctx.host.system_action(SystemAction::Mute);
        return reply("Muted, sir.");
    }
    if UNMUTE.is_match(text) {
        ctx.host.system_action(SystemAction::Unmute);
        return reply("Unmuted, sir.");
    }
    let (action, answer) = if VOLUME_UP.is_match(text) {
        (SystemAction::VolumeUp, "As you wish, sir.")
    } else if VOLUME_DOWN.is_match(text) {
        (SystemAction::VolumeDown, "Very good, sir.")
    } else {
        return Ok(HandlerOutcome::Declined);
    };
    for _ in 0..VOLUME_STEPS {
        ctx.host.system_action(action);
    }
    reply(answer)
}

fn close_window(_text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    ctx.host.system_action(SystemAction::CloseWindow);
    reply("Closed, sir.")
}

fn lock(_text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    ctx.host.system_action(SystemAction::Lock);
    reply("Locking, sir.")
}

fn sleep(_text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    ctx.host.system_action(SystemAction::Sleep);
    reply("Good night, sir.")
}

fn power(text: &str) -> Result<Option<ConfirmationRequest>, CommandError> {
    if SHUTDOWN.is_match(text) {
        return Ok(Some(ConfirmationRequest {
            prompt: "Shut down this PC now?".into(),
            action: GuardedAction::Shutdown,
        }));
    }
    if RESTART.is_match(text) {
        return Ok(Some(ConfirmationRequest {
            prompt: "Restart this PC now?".into(),
            action: GuardedAction::Restart,
        }));
    }
    Ok(None)
}

fn clear_notes(_text: &str) -> Result<Option<ConfirmationRequest>, CommandError> {
    Ok(Some(ConfirmationRequest {
        prompt: "Clear all notes?".into(),
        action: GuardedAction::ClearNotes,
    }))
}

fn exit(_text: &str) -> Result<Option<ConfirmationRequest>, CommandError> {
    Ok(Some(ConfirmationRequest {
        prompt: "Exit the assistant now?".into(),
        action: GuardedAction::ExitAssistant,
    }))
}

fn notes(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let path = ctx.notes_path();
    if SHOW_NOTES.is_match(text) {
        if !path.exists() {
            fs::write(&path, "")?;
        }
        return if ctx.host.open_external_resource(&path.to_string_lossy()) {
            reply("Your notes, sir.")
        } else {
            reply("Apologies, sir. I could not open your notes.")
        };
    }
    let Some(body) = capture(&NOTE_BODY, text) else {
        return Ok(HandlerOutcome::Declined);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let stamp = ctx.now().with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "[{stamp}] {body}")?;
    reply("Noted, sir.")
}

fn smalltalk(text: &str, _ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    if HOW_ARE_YOU.is_match(text) {
        return reply("Operating within normal parameters, sir.");
    }
    if THANKS.is_match(text) {
        return reply("Quite so, sir.");
    }
    if WHO_ARE_YOU.is_match(text) {
        return reply("Jarvis, at your service, sir.");
    }
    if let Some(part) = capture(&GREETING, text) {
        return reply(format!("Good {part}, sir."));
    }
    Ok(HandlerOutcome::Declined)
}

fn maps(text: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, CommandError> {
    let Some(dest) = capture(&DESTINATION, text) else {
        return Ok(HandlerOutcome::Declined);
    };
    open_url(
        ctx,
        &format!(
            "https://www.google.com/maps/dir/?api=1&destination={}",
            urlencoding::encode(&dest)
        ),
    );
    reply(format!("Directions to {dest}, sir."))
}
