//! Pattern-based classification of raw server log lines into [`Event`]s.
//!
//! Classification is stateless: a line's meaning never depends on the
//! lines before it. The log prefix (timestamp, thread, level and, on
//! Forge, the logger name) is stripped first, then the message is matched
//! against an ordered list of patterns where the first match wins.

use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime, NaiveTime};
use regex::{Regex, RegexBuilder};

use crate::event::{Event, EventKind};

/// Player names: ASCII letters, digits and underscore.
const NAME: &str = r"[A-Za-z0-9_]{1,16}";

/// `[stamp] [thread/LEVEL] [logger]: message` (Forge) or
/// `[stamp] [thread/LEVEL]: message` (vanilla).
static LOG_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(?P<stamp>[^\]]+)\] \[(?P<thread>[^\]/]+)/(?P<level>[A-Z]+)\](?: \[(?P<logger>[^\]]*)\])?: ?(?P<msg>.*)$",
    )
    .expect("log prefix pattern is valid")
});

static VANISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\[({NAME}): \[Vanishmod\] {NAME} (vanished|unvanished)\]$"
    ))
    .expect("vanish pattern is valid")
});

static JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({NAME})(?: \(formerly known as {NAME}\))? joined the game$"
    ))
    .expect("join pattern is valid")
});

static LEAVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({NAME}) left the game$")).expect("leave pattern is valid")
});

// Modded servers prepend rank tags inside the brackets: `<[Admin] Name>`.
static CHAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^<(?:\[[^\]]*\]\s*)*({NAME})> ?(.*)$")).expect("chat pattern is valid")
});

static ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({NAME}) (?:has (?:made the advancement|reached the goal|completed the challenge) \[.+\]|(?:was|fell|drowned|died|burned|blew up|hit the ground|starved|suffocated|froze|tried to swim|went up in flames|went off with a bang|walked into|experienced kinetic energy|withered away|discovered the floor|didn't want to live)\b.*)$"
    ))
    .expect("announcement pattern is valid")
});

static PERF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:overall:.*mean tps:|tps from last)").expect("perf line pattern is valid")
});

static TPS_OVERALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)overall:.*?mean tps:\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("overall tps pattern is valid")
});

static TPS_ANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)mean tps:\s*([0-9]+(?:\.[0-9]+)?)").expect("mean tps pattern is valid")
});

static TPS_PAPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tps from last 1m, 5m, 15m:\s*\*?([0-9]+(?:\.[0-9]+)?)")
        .expect("paper tps pattern is valid")
});

static COLOR_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§.").expect("color code pattern is valid"));

const BUILTIN_STOPPED: &[&str] = &[r"^\[Rcon\] SERVER STOPPED", r"^Stopping (?:the )?server\b"];
const BUILTIN_STARTING: &[&str] = &[
    r"^\[Rcon\] SERVER STARTING",
    r"^Starting minecraft server version\b",
];
const BUILTIN_STARTED: &[&str] = &[
    r"^\[Rcon\] SERVER STARTED",
    r#"^Done \([0-9.,]+m?s\)! For help, type "help""#,
];

/// Extracts the wall-clock time from a log prefix stamp.
pub trait TimestampExtractor: Send + Sync {
    /// Parse the bracketed stamp (without brackets), or `None` if unknown.
    fn extract(&self, stamp: &str) -> Option<NaiveDateTime>;
}

/// Understands Forge (`14Dec2023 07:29:06.982`) and vanilla (`07:29:06`) stamps.
///
/// Vanilla stamps carry no date, so today's local date is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTimestamp;

impl TimestampExtractor for LogTimestamp {
    fn extract(&self, stamp: &str) -> Option<NaiveDateTime> {
        if let Ok(full) = NaiveDateTime::parse_from_str(stamp, "%d%b%Y %H:%M:%S%.3f") {
            return Some(full);
        }
        let time = NaiveTime::parse_from_str(stamp, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(stamp, "%H:%M:%S"))
            .ok()?;
        Some(Local::now().date_naive().and_time(time))
    }
}

/// Additional literal lifecycle markers, matched case-insensitively at the
/// start of the log message.
#[derive(Debug, Clone, Default)]
pub struct LifecycleMarkers {
    /// Markers meaning the server stopped.
    pub stopped: Vec<String>,
    /// Markers meaning the server is starting.
    pub starting: Vec<String>,
    /// Markers meaning the server finished starting.
    pub started: Vec<String>,
}

/// Stateless line classifier holding the compiled lifecycle markers.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    stopped: Vec<Regex>,
    starting: Vec<Regex>,
    started: Vec<Regex>,
}

/// A log line split into its prefix fields and message.
struct SplitLine<'a> {
    stamp: Option<&'a str>,
    thread: Option<&'a str>,
    level: Option<&'a str>,
    logger: Option<&'a str>,
    message: &'a str,
}

impl SplitLine<'_> {
    /// Only the main server thread at INFO level, logging through the
    /// server's own logger, prints player chat and announcements.
    /// Lines without a recognizable prefix are given the benefit of the doubt.
    fn is_server_info(&self) -> bool {
        let thread_ok = match (self.thread, self.level) {
            (Some(thread), Some(level)) => thread == "Server thread" && level == "INFO",
            _ => true,
        };
        let logger_ok = self.logger.is_none_or(|logger| {
            logger.contains("MinecraftServer") || logger.contains("DedicatedServer")
        });
        thread_ok && logger_ok
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self {
            stopped: compile_builtin(BUILTIN_STOPPED),
            starting: compile_builtin(BUILTIN_STARTING),
            started: compile_builtin(BUILTIN_STARTED),
        }
    }
}

impl LineClassifier {
    /// Create a classifier with the built-in markers plus `extra` ones.
    ///
    /// # Errors
    ///
    /// Returns an error if an escaped marker cannot be compiled (for
    /// example when it exceeds the regex size limit).
    pub fn with_markers(extra: &LifecycleMarkers) -> Result<Self, regex::Error> {
        let mut classifier = Self::default();
        classifier.stopped.extend(compile_literals(&extra.stopped)?);
        classifier.starting.extend(compile_literals(&extra.starting)?);
        classifier.started.extend(compile_literals(&extra.started)?);
        Ok(classifier)
    }

    /// Classify one raw log line.
    pub fn classify(&self, raw_line: &str, timestamps: &dyn TimestampExtractor) -> Event {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        let split = split_line(line);
        let timestamp = split
            .stamp
            .and_then(|stamp| timestamps.extract(stamp))
            .unwrap_or_else(|| Local::now().naive_local());
        Event::new(self.classify_message(&split, timestamp), line)
    }

    fn classify_message(&self, split: &SplitLine<'_>, timestamp: NaiveDateTime) -> EventKind {
        let message = split.message.trim_end();

        if any_match(&self.stopped, message) {
            return EventKind::ServerStopped { timestamp };
        }
        if any_match(&self.starting, message) {
            return EventKind::ServerStarting { timestamp };
        }
        if any_match(&self.started, message) {
            return EventKind::ServerStarted { timestamp };
        }

        if !split.is_server_info() {
            return EventKind::Unrecognized;
        }

        if PERF_LINE.is_match(message) {
            if let Some(tps) = parse_tps(message) {
                return EventKind::PerfReport { tps, timestamp };
            }
        }

        if let Some(caps) = VANISH.captures(message) {
            return EventKind::VanishToggle {
                player: caps[1].to_owned(),
                visible: &caps[2] == "unvanished",
            };
        }
        if let Some(caps) = JOIN.captures(message) {
            return EventKind::PlayerJoin {
                player: caps[1].to_owned(),
                timestamp,
            };
        }
        if let Some(caps) = LEAVE.captures(message) {
            return EventKind::PlayerLeave {
                player: caps[1].to_owned(),
                timestamp,
            };
        }

        let chat_body = message.strip_prefix("[Not Secure] ").unwrap_or(message);
        if let Some(caps) = CHAT.captures(chat_body) {
            let text = caps[2].trim();
            if text.is_empty() {
                return EventKind::Unrecognized;
            }
            return EventKind::Chat {
                player: caps[1].to_owned(),
                text: text.to_owned(),
                timestamp,
            };
        }

        if let Some(caps) = ANNOUNCEMENT.captures(message) {
            return EventKind::Announcement {
                player: caps[1].to_owned(),
                text: message.to_owned(),
                timestamp,
            };
        }

        EventKind::Unrecognized
    }
}

/// Extract ticks-per-second from a Forge `/forge tps` or Paper `/tps` text.
///
/// Prefers the Forge `Overall` line when several dimensions are listed.
pub fn parse_tps(text: &str) -> Option<f64> {
    let plain = COLOR_CODES.replace_all(text, "");
    [&*TPS_OVERALL, &*TPS_ANY, &*TPS_PAPER]
        .into_iter()
        .find_map(|pattern| pattern.captures(&plain))
        .and_then(|caps| caps[1].parse::<f64>().ok())
}

fn split_line(line: &str) -> SplitLine<'_> {
    match LOG_PREFIX.captures(line) {
        Some(caps) => SplitLine {
            stamp: caps.name("stamp").map(|m| m.as_str()),
            thread: caps.name("thread").map(|m| m.as_str()),
            level: caps.name("level").map(|m| m.as_str()),
            logger: caps.name("logger").map(|m| m.as_str()),
            message: caps.name("msg").map_or("", |m| m.as_str()),
        },
        None => SplitLine {
            stamp: None,
            thread: None,
            level: None,
            logger: None,
            message: line,
        },
    }
}

fn any_match(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(message))
}

fn compile_builtin(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect()
}

fn compile_literals(markers: &[String]) -> Result<Vec<Regex>, regex::Error> {
    markers
        .iter()
        .filter(|marker| !marker.trim().is_empty())
        .map(|marker| {
            RegexBuilder::new(&format!("^{}", regex::escape(marker.trim())))
                .case_insensitive(true)
                .build()
        })
        .collect()
}
