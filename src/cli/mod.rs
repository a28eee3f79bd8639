//! Command parsing and execution for `pulse_cli`.
//!
//! One-shot invocations and REPL lines both parse into a [`Command`]; running
//! it yields a JSON value that [`outputformatter::print_result`] renders.

pub mod outputformatter;

use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::identity::LoginRequest;
use crate::model::Severity;
use crate::router::{DataRouter, ListParams};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: String, password: String },
    Logout,
    Whoami,
    Can(String),
    Voters { search: Option<String>, page: u32, page_size: u32 },
    Campaigns { page: u32 },
    Alerts { severity: Option<Severity>, limit: Option<u32> },
    NewsStats { days: u32 },
    Trending { days: u32, limit: u32 },
    Help,
}

pub fn help_text() -> &'static str {
    "Commands:\n\
     \x20 login <email> <password>     sign in and persist the session\n\
     \x20 logout                       sign out (server invalidation is best effort)\n\
     \x20 whoami                       show the current identity\n\
     \x20 can <permission>             check a permission for the current identity\n\
     \x20 voters [--search S] [--page N] [--page-size N]\n\
     \x20 campaigns [--page N]\n\
     \x20 alerts [--severity low|medium|high|critical] [--limit N]\n\
     \x20 news-stats [days]            sentiment breakdown of recent news (default 7)\n\
     \x20 trending [days] [limit]      trending news topics (default 7 10)\n\
     \x20 help"
}

fn usage_err(msg: impl Into<String>) -> AppError { AppError::user("cli_usage", msg) }

fn number(flag: &str, v: Option<&String>) -> AppResult<u32> {
    let v = v.ok_or_else(|| usage_err(format!("{} requires a value", flag)))?;
    match v.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(usage_err(format!("{} expects a positive number, got '{}'", flag, v))),
    }
}

impl Command {
    /// Parse `words` (command name first). Unknown commands and flags are errors.
    pub fn parse(words: &[String]) -> AppResult<Self> {
        let Some((name, rest)) = words.split_first() else {
            return Err(usage_err("no command given"));
        };
        let positional = |i: usize| rest.get(i).filter(|w| !w.starts_with("--"));
        let cmd = match name.as_str() {
            "login" => match rest {
                [email, password] => Command::Login { email: email.clone(), password: password.clone() },
                _ => return Err(usage_err("usage: login <email> <password>")),
            },
            "logout" => Command::Logout,
            "whoami" => Command::Whoami,
            "can" => match rest {
                [perm] => Command::Can(perm.clone()),
                _ => return Err(usage_err("usage: can <permission>")),
            },
            "voters" => {
                let (mut search, mut page, mut page_size) = (None, 1, 20);
                let mut i = 0;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--search" => search = Some(rest.get(i + 1).ok_or_else(|| usage_err("--search requires a value"))?.clone()),
                        "--page" => page = number("--page", rest.get(i + 1))?,
                        "--page-size" => page_size = number("--page-size", rest.get(i + 1))?,
                        other => return Err(usage_err(format!("unrecognized argument: {}", other))),
                    }
                    i += 2;
                }
                Command::Voters { search, page, page_size }
            }
            "campaigns" => match rest {
                [] => Command::Campaigns { page: 1 },
                [flag, v] if flag == "--page" => Command::Campaigns { page: number("--page", Some(v))? },
                _ => return Err(usage_err("usage: campaigns [--page N]")),
            },
            "alerts" => {
                let (mut severity, mut limit) = (None, None);
                let mut i = 0;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--severity" => {
                            let v = rest.get(i + 1).ok_or_else(|| usage_err("--severity requires a value"))?;
                            severity = Some(v.parse::<Severity>()?);
                        }
                        "--limit" => limit = Some(number("--limit", rest.get(i + 1))?),
                        other => return Err(usage_err(format!("unrecognized argument: {}", other))),
                    }
                    i += 2;
                }
                Command::Alerts { severity, limit }
            }
            "news-stats" => Command::NewsStats {
                days: positional(0).map(|d| number("days", Some(d))).transpose()?.unwrap_or(7),
            },
            "trending" => Command::Trending {
                days: positional(0).map(|d| number("days", Some(d))).transpose()?.unwrap_or(7),
                limit: positional(1).map(|l| number("limit", Some(l))).transpose()?.unwrap_or(10),
            },
            "help" | "-h" | "--help" => Command::Help,
            other => return Err(usage_err(format!("unknown command '{}'", other))),
        };
        Ok(cmd)
    }
}

/// Split a REPL line on whitespace, keeping double-quoted runs together.
pub fn split_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut started = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started { out.push(std::mem::take(&mut cur)); }
                started = false;
            }
            c => {
                cur.push(c);
                started = true;
            }
        }
    }
    if started { out.push(cur); }
    out
}

/// Run one command against the session and data router.
pub async fn execute(router: &DataRouter, cmd: &Command) -> AppResult<Value> {
    let session = router.session();
    let out = match cmd {
        Command::Login { email, password } => {
            let identity = session.login(&LoginRequest::new(email.as_str(), password.as_str())).await?;
            serde_json::to_value(identity)?
        }
        Command::Logout => {
            session.logout().await;
            json!({"state": session.state().label()})
        }
        Command::Whoami => match session.identity() {
            Some(identity) => serde_json::to_value(identity)?,
            None => json!({"state": session.state().label()}),
        },
        Command::Can(perm) => json!({"permission": perm, "granted": session.has_permission(perm)}),
        Command::Voters { search, page, page_size } => {
            let mut params = ListParams::new().page(*page).page_size(*page_size);
            if let Some(s) = search { params = params.search(s.as_str()); }
            serde_json::to_value(router.voters().list(&params).await?)?
        }
        Command::Campaigns { page } => {
            serde_json::to_value(router.campaigns().list(&ListParams::new().page(*page)).await?)?
        }
        Command::Alerts { severity, limit } => serde_json::to_value(router.alerts().list(*severity, *limit).await?)?,
        Command::NewsStats { days } => serde_json::to_value(router.news().sentiment_stats(*days).await?)?,
        Command::Trending { days, limit } => {
            let t = router.news().trending_topics(*days, *limit).await?;
            serde_json::to_value(t.trending_topics)?
        }
        Command::Help => Value::String(help_text().to_string()),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> { split_line(s) }

    #[test]
    fn parses_list_commands_with_flags() {
        assert_eq!(
            Command::parse(&words("voters --search kumar --page 2 --page-size 5")).unwrap(),
            Command::Voters { search: Some("kumar".into()), page: 2, page_size: 5 }
        );
        assert_eq!(
            Command::parse(&words("alerts --severity HIGH --limit 3")).unwrap(),
            Command::Alerts { severity: Some(Severity::High), limit: Some(3) }
        );
        assert_eq!(Command::parse(&words("trending 30")).unwrap(), Command::Trending { days: 30, limit: 10 });
        assert_eq!(Command::parse(&words("news-stats")).unwrap(), Command::NewsStats { days: 7 });
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse(&words("login only@one.com")).is_err());
        assert!(Command::parse(&words("voters --page 0")).is_err());
        assert!(Command::parse(&words("voters --page")).is_err());
        assert!(Command::parse(&words("alerts --severity extreme")).is_err());
        assert!(Command::parse(&words("frobnicate")).is_err());
        assert!(Command::parse(&[]).is_err());
    }

    #[test]
    fn quoted_words_stay_together() {
        assert_eq!(words(r#"voters --search "ravi kumar""#), vec!["voters", "--search", "ravi kumar"]);
        assert_eq!(words("  whoami  "), vec!["whoami"]);
        assert_eq!(words(r#"login a@b.com """#), vec!["login", "a@b.com", ""]);
    }
}
