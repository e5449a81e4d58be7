//! Command policy gate.
//!
//! Shell commands are checked against a fixed deny-list before they reach
//! the container. Matching is structural: the command text is split on shell
//! control operators, each segment is lexed into argv with `shlex`, wrappers
//! such as `sudo`, `env` or `npx` are peeled off, and rules look at the
//! program name and the position of its arguments. `git checkout dev` and
//! `npm install --save-dev x` therefore pass while `npm run dev` does not.

use serde::{Deserialize, Serialize};

/// Exit code reported for commands refused by the policy.
pub const BLOCKED_EXIT_CODE: i64 = 126;

/// Nested `sh -c` scripts deeper than this are not inspected further.
const MAX_SCRIPT_DEPTH: usize = 3;

/// Script names that start servers or watchers when run through a package manager.
const LONG_RUNNING_SCRIPTS: &[&str] = &[
    "dev", "start", "serve", "server", "watch", "preview", "develop", "storybook",
];

/// Category of a deny rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// Development servers started directly or through package scripts.
    DevServer,
    /// Bare HTTP-serving invocations.
    HttpServer,
    /// Test runners and compilers in watch mode.
    WatchMode,
    /// Log followers that never exit.
    FollowMode,
    /// Full-screen interactive programs.
    Interactive,
}

/// A single deny rule.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub id: &'static str,
    pub kind: RuleKind,
    pub reason: &'static str,
    matcher: fn(&CommandSegment) -> bool,
}

impl PolicyRule {
    fn matches(&self, segment: &CommandSegment) -> bool {
        (self.matcher)(segment)
    }
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub matched_rule: Option<String>,
    pub kind: Option<RuleKind>,
    pub reason: String,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            matched_rule: None,
            kind: None,
            reason: "No matching rule".to_string(),
        }
    }

    fn deny(rule: &PolicyRule, segment: &CommandSegment) -> Self {
        Self {
            allowed: false,
            matched_rule: Some(rule.id.to_string()),
            kind: Some(rule.kind),
            reason: format!("{} (`{}`)", rule.reason, segment.render()),
        }
    }

    /// Message reported on stderr when a command is refused.
    pub fn message(&self) -> String {
        format!(
            "Command blocked by sandbox policy: {}. Long-running and interactive \
             processes cannot run here; use a bounded alternative (e.g. a build \
             or a single test run).",
            self.reason
        )
    }
}

/// One simple command: program name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSegment {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSegment {
    fn from_tokens(mut tokens: Vec<String>) -> Option<Self> {
        if tokens.is_empty() {
            return None;
        }
        let program = tokens.remove(0);
        let program = if is_env_assignment(&program) {
            program
        } else {
            program
                .rsplit('/')
                .next()
                .unwrap_or(program.as_str())
                .to_string()
        };
        Some(Self {
            program,
            args: tokens,
        })
    }

    /// Arguments that are not flags.
    fn positional(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
    }

    fn first_positional(&self) -> Option<&str> {
        self.positional().next()
    }

    /// Positional arguments of a package-manager invocation, with their
    /// indices in `args`. Values of options such as `--filter web` or
    /// `-C web` are skipped so they are never taken for a subcommand.
    fn package_positional(&self) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut skip_value = false;
        for (index, arg) in self.args.iter().enumerate() {
            if std::mem::take(&mut skip_value) {
                continue;
            }
            if arg.starts_with('-') {
                skip_value = package_flag_takes_value(&self.program, arg);
                continue;
            }
            out.push((index, arg.as_str()));
        }
        out
    }

    fn has_flag(&self, flags: &[&str]) -> bool {
        self.args.iter().any(|a| flags.contains(&a.as_str()))
    }

    fn is(&self, names: &[&str]) -> bool {
        names.contains(&self.program.as_str())
    }

    fn is_python(&self) -> bool {
        self.program == "python"
            || self
                .program
                .strip_prefix("python")
                .is_some_and(|v| v.chars().all(|c| c.is_ascii_digit() || c == '.'))
    }

    /// Drop the program and continue with the next token as the program.
    fn shift(&self, skip: usize) -> Option<Self> {
        Self::from_tokens(self.args.iter().skip(skip).cloned().collect())
    }

    fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The deny-list gate applied to every command before dispatch.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandPolicy {
    /// Create the policy with the built-in rule set.
    pub fn new() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Evaluate a raw command string.
    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        self.evaluate_script(command, 0)
    }

    fn evaluate_script(&self, script: &str, depth: usize) -> PolicyDecision {
        for segment in parse_segments(script) {
            // `bash -c '<script>'` is judged by the script it runs.
            if depth < MAX_SCRIPT_DEPTH && segment.is(&["sh", "bash", "zsh", "dash", "ash"]) {
                if let Some(inner) = inline_script(&segment) {
                    let decision = self.evaluate_script(inner, depth + 1);
                    if !decision.allowed {
                        return decision;
                    }
                    continue;
                }
            }

            if let Some(rule) = self.rules.iter().find(|r| r.matches(&segment)) {
                tracing::warn!(
                    rule = rule.id,
                    command = %script,
                    "Command blocked by policy"
                );
                return PolicyDecision::deny(rule, &segment);
            }
        }
        PolicyDecision::allow()
    }
}

fn inline_script(segment: &CommandSegment) -> Option<&str> {
    let pos = segment
        .args
        .iter()
        .position(|a| a == "-c" || (a.starts_with('-') && !a.starts_with("--") && a.ends_with('c')))?;
    segment.args.get(pos + 1).map(String::as_str)
}

// =============================================================================
// Lexing
// =============================================================================

/// Split a command line into simple commands with wrappers removed.
pub fn parse_segments(command: &str) -> Vec<CommandSegment> {
    split_control_operators(command)
        .into_iter()
        .filter_map(|raw| {
            let tokens = shlex::split(&raw)
                .unwrap_or_else(|| raw.split_whitespace().map(str::to_string).collect());
            CommandSegment::from_tokens(tokens)
        })
        .filter_map(unwrap_wrappers)
        .collect()
}

/// Split on `;`, `&`, `|`, newlines and subshell parentheses outside quotes.
fn split_control_operators(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' | '&' | '|' | '\n' | '(' | ')' if !in_single && !in_double => {
                if !current.trim().is_empty() {
                    segments.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Peel off env assignments and command wrappers until the real program.
fn unwrap_wrappers(mut segment: CommandSegment) -> Option<CommandSegment> {
    loop {
        if is_env_assignment(&segment.program) {
            segment = segment.shift(0)?;
            continue;
        }
        let skip_flags = |segment: &CommandSegment| {
            segment
                .args
                .iter()
                .take_while(|a| a.starts_with('-') || is_env_assignment(a))
                .count()
        };
        let next = match segment.program.as_str() {
            "sudo" | "env" | "nohup" | "time" | "exec" | "command" | "nice" | "stdbuf" => {
                let n = skip_flags(&segment);
                segment.shift(n)
            }
            "npx" | "pnpx" | "bunx" => {
                let n = skip_flags(&segment);
                segment.shift(n)
            }
            "npm" | "pnpm" | "yarn" | "bun" => {
                let exec_at = segment
                    .package_positional()
                    .first()
                    .and_then(|&(pos, sub)| matches!(sub, "exec" | "dlx" | "x").then_some(pos));
                let Some(pos) = exec_at else {
                    return Some(segment);
                };
                let rest = CommandSegment {
                    program: segment.program.clone(),
                    args: segment.args[pos + 1..].to_vec(),
                };
                let n = skip_flags(&rest);
                rest.shift(n)
            }
            _ => return Some(segment),
        };
        segment = next?;
    }
}

// =============================================================================
// Rules
// =============================================================================

fn is_long_running_script(name: &str) -> bool {
    LONG_RUNNING_SCRIPTS.iter().any(|s| {
        name == *s
            || name
                .strip_prefix(s)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

/// Package-manager options whose value is the following token.
fn package_flag_takes_value(program: &str, flag: &str) -> bool {
    match flag {
        "--filter" | "-F" | "-C" | "--dir" | "--prefix" | "--cwd" | "--workspace" | "--from"
        | "--include" | "--exclude" => true,
        // pnpm's -w is --workspace-root and takes no value.
        "-w" => program == "npm",
        _ => false,
    }
}

fn package_script_server(s: &CommandSegment) -> bool {
    if !s.is(&["npm", "pnpm", "yarn", "bun"]) {
        return false;
    }
    let positional: Vec<&str> = s.package_positional().into_iter().map(|(_, a)| a).collect();
    let command: &[&str] = match positional.as_slice() {
        ["workspace", _name, rest @ ..] if s.program == "yarn" => rest,
        ["workspaces", "foreach", rest @ ..] if s.program == "yarn" => rest,
        all => all,
    };
    match command {
        ["run" | "run-script", script, ..] => is_long_running_script(script),
        ["start", ..] => true,
        // pnpm, yarn and bun run scripts without the `run` keyword.
        [script, ..] if s.program != "npm" => is_long_running_script(script),
        _ => false,
    }
}

fn framework_dev_server(s: &CommandSegment) -> bool {
    let sub = s.first_positional();
    match s.program.as_str() {
        "next" => matches!(sub, Some("dev" | "start")),
        "vite" => matches!(sub, None | Some("dev" | "serve" | "preview")),
        "nuxt" | "nuxi" => matches!(sub, Some("dev" | "preview" | "start")),
        "astro" | "svelte-kit" => matches!(sub, Some("dev" | "preview")),
        "remix" => matches!(sub, Some("dev")),
        "gatsby" => matches!(sub, Some("develop" | "serve")),
        "ng" => matches!(sub, Some("serve" | "s")),
        "webpack" => matches!(sub, Some("serve")),
        "react-scripts" => matches!(sub, Some("start")),
        "vue-cli-service" => matches!(sub, Some("serve")),
        "parcel" => !matches!(sub, Some("build")),
        "webpack-dev-server" | "nodemon" | "ts-node-dev" | "live-server" | "browser-sync" => true,
        "uvicorn" | "gunicorn" | "hypercorn" | "daphne" => true,
        "flask" => matches!(sub, Some("run")),
        "rails" => matches!(sub, Some("server" | "s")),
        "jekyll" => matches!(sub, Some("serve" | "s")),
        "hugo" => matches!(sub, Some("server" | "serve")),
        "php" => {
            let args: Vec<&str> = s.args.iter().map(String::as_str).collect();
            matches!(args.as_slice(), ["artisan", "serve", ..])
        }
        _ if s.is_python() => {
            let args: Vec<&str> = s.args.iter().map(String::as_str).collect();
            match args.as_slice() {
                [script, "runserver", ..] => script.ends_with("manage.py"),
                ["-m", "flask", "run", ..] => true,
                ["-m", "uvicorn" | "gunicorn", ..] => true,
                _ => false,
            }
        }
        _ => false,
    }
}

fn http_server(s: &CommandSegment) -> bool {
    if s.is_python() {
        let args: Vec<&str> = s.args.iter().map(String::as_str).collect();
        return matches!(
            args.as_slice(),
            ["-m", "http.server" | "SimpleHTTPServer", ..]
        );
    }
    match s.program.as_str() {
        "http-server" | "serve" | "json-server" => true,
        "php" => s.has_flag(&["-S"]),
        "ruby" => s.args.windows(2).any(|w| w[0] == "-run" && w[1] == "-e")
            || s.args.iter().any(|a| a == "-run" || a == "-rwebrick"),
        _ => false,
    }
}

fn watch_mode(s: &CommandSegment) -> bool {
    let watch_flag = s.args.iter().any(|a| {
        matches!(a.as_str(), "--watch" | "--watchAll" | "--watch-all")
            || a.strip_prefix("--watch=")
                .or_else(|| a.strip_prefix("--watchAll="))
                .is_some_and(|v| v != "false")
    });
    if watch_flag {
        return true;
    }
    match s.program.as_str() {
        // vitest watches unless told to run once
        "vitest" => {
            !s.has_flag(&["--run"]) && matches!(s.first_positional(), None | Some("watch" | "dev"))
        }
        "tsc" => s.has_flag(&["-w"]),
        "cargo" => matches!(s.first_positional(), Some("watch")),
        "watch" | "watchexec" | "entr" => true,
        _ => false,
    }
}

fn follow_mode(s: &CommandSegment) -> bool {
    match s.program.as_str() {
        "tail" => s
            .args
            .iter()
            .any(|a| a == "--follow" || a.starts_with("--follow=") || is_short_flag_with(a, &['f', 'F'])),
        "journalctl" => s.args.iter().any(|a| a == "--follow" || is_short_flag_with(a, &['f'])),
        _ => false,
    }
}

fn interactive(s: &CommandSegment) -> bool {
    s.is(&["top", "htop", "btop", "vim", "vi", "nvim", "nano", "emacs"])
}

/// `-f`, `-nf`, `-fn` style bundles containing one of `letters`.
fn is_short_flag_with(arg: &str, letters: &[char]) -> bool {
    arg.strip_prefix('-')
        .is_some_and(|rest| !rest.starts_with('-') && rest.chars().any(|c| letters.contains(&c)))
}

fn builtin_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            id: "package-script-server",
            kind: RuleKind::DevServer,
            reason: "package script starts a long-running dev server",
            matcher: package_script_server,
        },
        PolicyRule {
            id: "framework-dev-server",
            kind: RuleKind::DevServer,
            reason: "framework dev server never exits",
            matcher: framework_dev_server,
        },
        PolicyRule {
            id: "http-server",
            kind: RuleKind::HttpServer,
            reason: "HTTP server never exits",
            matcher: http_server,
        },
        PolicyRule {
            id: "watch-mode",
            kind: RuleKind::WatchMode,
            reason: "watch mode never exits",
            matcher: watch_mode,
        },
        PolicyRule {
            id: "follow-mode",
            kind: RuleKind::FollowMode,
            reason: "following output never exits",
            matcher: follow_mode,
        },
        PolicyRule {
            id: "interactive",
            kind: RuleKind::Interactive,
            reason: "interactive program needs a terminal",
            matcher: interactive,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(cmd: &str) -> bool {
        !CommandPolicy::new().evaluate(cmd).allowed
    }

    #[test]
    fn test_dev_servers_blocked() {
        for cmd in [
            "npm run dev",
            "npm run start",
            "npm start",
            "npm run dev:frontend",
            "pnpm dev",
            "pnpm run serve",
            "yarn start",
            "bun dev",
            "next dev",
            "next start -p 3000",
            "npx next dev",
            "npx -y vite",
            "pnpm exec vite preview",
            "vite",
            "ng serve",
            "nodemon app.js",
            "uvicorn main:app --reload",
            "flask run",
            "python manage.py runserver 0.0.0.0:8000",
            "php artisan serve",
            "pnpm --filter web dev",
            "pnpm --filter=web dev",
            "pnpm -F web run serve",
            "pnpm -C web dev",
            "pnpm --dir apps/web start",
            "pnpm -w dev",
            "npm --prefix web run dev",
            "npm -w web run dev",
            "npm --workspace=web start",
            "yarn workspace web dev",
            "yarn workspace web run start",
            "yarn --cwd web dev",
            "yarn workspaces foreach -A run dev",
            "bun --filter web dev",
            "pnpm --filter web exec vite",
        ] {
            assert!(blocked(cmd), "{cmd} should be blocked");
        }
    }

    #[test]
    fn test_substring_dev_not_blocked() {
        for cmd in [
            "npm install --save-dev typescript",
            "npm i -D vite",
            "git checkout dev",
            "git branch -d develop",
            "ls /dev/null",
            "npm run build",
            "npm test",
            "pnpm install",
            "yarn add -D nodemon",
            "vite build",
            "next build",
            "echo 'npm run dev'",
            "cat devserver.log",
            "timeout 10 npm run dev",
            "pnpm --filter web build",
            "pnpm -C web install",
            "npm --prefix web run test",
            "yarn workspace web build",
            "yarn workspace dev build",
        ] {
            assert!(!blocked(cmd), "{cmd} should be allowed");
        }
    }

    #[test]
    fn test_http_servers_blocked() {
        assert!(blocked("python -m http.server 8080"));
        assert!(blocked("python3 -m http.server"));
        assert!(blocked("php -S localhost:8000"));
        assert!(blocked("npx http-server ."));
        assert!(blocked("serve dist"));
        assert!(!blocked("python3 -m pytest"));
        assert!(!blocked("php -v"));
    }

    #[test]
    fn test_watch_modes() {
        assert!(blocked("jest --watch"));
        assert!(blocked("npm test -- --watchAll"));
        assert!(blocked("npx vitest"));
        assert!(blocked("tsc -w"));
        assert!(blocked("cargo watch -x test"));
        assert!(!blocked("npx vitest run"));
        assert!(!blocked("vitest --run"));
        assert!(!blocked("jest --watchAll=false"));
        assert!(!blocked("tsc --noEmit"));
    }

    #[test]
    fn test_follow_and_interactive() {
        assert!(blocked("tail -f app.log"));
        assert!(blocked("tail -n 20 -F app.log"));
        assert!(!blocked("tail -n 20 app.log"));
        assert!(blocked("vim main.rs"));
    }

    #[test]
    fn test_compound_commands() {
        assert!(blocked("npm install && npm run dev"));
        assert!(blocked("cd web;pnpm dev"));
        assert!(blocked("(cd web && yarn start)"));
        assert!(blocked("PORT=3000 npm run dev"));
        assert!(blocked("sudo -E env NODE_ENV=development npm run dev"));
        assert!(blocked("npm run dev &"));
        assert!(!blocked("npm install && npm run build | tee build.log"));
    }

    #[test]
    fn test_nested_shell_scripts() {
        assert!(blocked("bash -c 'npm run dev'"));
        assert!(blocked("sh -lc \"cd app && next dev\""));
        assert!(!blocked("bash -c 'npm run lint'"));
    }

    #[test]
    fn test_decision_details() {
        let decision = CommandPolicy::new().evaluate("npm run dev");
        assert!(!decision.allowed);
        assert_eq!(decision.matched_rule.as_deref(), Some("package-script-server"));
        assert_eq!(decision.kind, Some(RuleKind::DevServer));
        assert!(decision.message().contains("npm run dev"));

        let decision = CommandPolicy::new().evaluate("ls -la");
        assert!(decision.allowed);
        assert!(decision.matched_rule.is_none());
    }

    #[test]
    fn test_parse_segments() {
        let segments = parse_segments("FOO=1 /usr/bin/npm run \"dev\" || echo 'a;b'");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].program, "npm");
        assert_eq!(segments[0].args, vec!["run", "dev"]);
        assert_eq!(segments[1].program, "echo");
        assert_eq!(segments[1].args, vec!["a;b"]);

        // Unbalanced quotes fall back to whitespace splitting
        let segments = parse_segments("echo \"unterminated");
        assert_eq!(segments[0].program, "echo");
    }
}
