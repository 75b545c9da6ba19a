//! Built-in rule classes: system-critical dangerous, known-junk safe, and the
//! suspicious fallback handled by the engine itself.

use std::time::Duration;

use crate::core::types::{ItemKind, RiskLabel};
use crate::rules::engine::RuleSpec;

/// Priority class for rules that protect the operating system and user data.
pub const CLASS_SYSTEM_CRITICAL: u8 = 0;
/// Priority class for well-known junk.
pub const CLASS_KNOWN_JUNK: u8 = 1;

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

fn rule(
    name: &str,
    description: &str,
    patterns: &[&str],
    label: RiskLabel,
    class: u8,
    rationale: &str,
) -> RuleSpec {
    RuleSpec {
        name: name.to_string(),
        description: description.to_string(),
        patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
        min_size: None,
        max_size: None,
        min_age: None,
        max_age: None,
        kind: None,
        label,
        priority_class: class,
        rationale: rationale.to_string(),
    }
}

/// The full built-in rule set, ordered by priority class.
#[must_use]
pub fn builtin_rules() -> Vec<RuleSpec> {
    let mut rules = vec![
        // ── system-critical: never junk ──
        rule(
            "windows-system",
            "Windows system directories",
            &["c:/windows/**", "**/system32/**", "**/winsxs/**"],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "path is inside a Windows system directory",
        ),
        rule(
            "program-files",
            "Installed application binaries",
            &["c:/program files/**", "c:/program files (x86)/**"],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "path is inside Program Files",
        ),
        rule(
            "drivers",
            "Device drivers",
            &["**/drivers/**", "**/*.sys"],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "path looks like a device driver",
        ),
        rule(
            "unix-system",
            "Unix system trees",
            &["/bin/**", "/sbin/**", "/usr/**", "/etc/**", "/boot/**"],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "path is inside a system tree",
        ),
        rule(
            "user-documents",
            "Personal document areas",
            &[
                "**/documents/**",
                "**/desktop/**",
                "**/downloads/**",
                "**/pictures/**",
            ],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "path is inside a personal document area",
        ),
        rule(
            "executables",
            "Executable programs",
            &["**/*.exe", "**/*.dll", "**/*.msi"],
            RiskLabel::Dangerous,
            CLASS_SYSTEM_CRITICAL,
            "executable program files are not junk",
        ),
        // ── known junk ──
        rule(
            "temp-dirs",
            "Temporary directories",
            &["**/temp/**", "**/tmp/**", "/tmp/**", "/var/tmp/**"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "temporary directory contents are disposable",
        ),
        rule(
            "prefetch",
            "Windows prefetch data",
            &["**/prefetch/**", "**/*.pf"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "prefetch data is regenerated by the OS",
        ),
        rule(
            "browser-caches",
            "Browser cache stores",
            &[
                "**/chrome/*/cache/**",
                "**/mozilla/firefox/*/cache2/**",
                "**/microsoft/edge/*/cache/**",
                "**/safari/*/cache.db",
            ],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "browser caches are rebuilt on demand",
        ),
        rule(
            "finder-droppings",
            "Desktop metadata droppings",
            &["**/.ds_store", "**/thumbs.db", "**/desktop.ini"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "desktop metadata files are regenerated",
        ),
        rule(
            "temp-extensions",
            "Well-known temporary extensions",
            &["**/*.tmp", "**/*.bak", "**/*.old", "**/*.chk", "**/~*"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "file extension marks it as temporary",
        ),
        rule(
            "python-cache",
            "Python bytecode caches",
            &["**/__pycache__/**", "**/*.pyc"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "bytecode caches are rebuilt by the interpreter",
        ),
        rule(
            "crash-dumps",
            "Crash dump files",
            &["**/*.dmp", "**/minidump/**"],
            RiskLabel::Safe,
            CLASS_KNOWN_JUNK,
            "crash dumps are diagnostic leftovers",
        ),
    ];

    // Log files are junk only once stale; a live log is worth keeping.
    let mut stale_logs = rule(
        "stale-logs",
        "Log files untouched for a week",
        &["**/*.log"],
        RiskLabel::Safe,
        CLASS_KNOWN_JUNK,
        "log file has not been touched for over a week",
    );
    stale_logs.min_age = Some(WEEK);
    stale_logs.kind = Some(ItemKind::File);
    rules.push(stale_logs);

    rules
}
