use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::{self, FeedScope, Post};
use crate::cli::{Cli, Command};
use crate::config::{self, Config};
use crate::credentials::{CredentialStore, DurableCredentials};
use crate::data::{ApiAuthService, ApiFeedService, ApiPostService, AuthService, FeedService, PostService};
use crate::feed::{Confirm, DeleteOutcome, Feed, FeedCache, RefreshOutcome};
use crate::media::MediaFile;
use crate::session::{self, Guard, Navigator, Redirect};
use crate::storage;
use crate::upload::{self, SubmitOutcome, TempPreviews};

/// Everything one CLI invocation needs, wired against the live API.
pub struct Context {
    pub session: session::Manager,
    pub feed: Arc<Feed>,
    pub uploads: upload::Coordinator,
}

pub fn build(cfg: &Config, navigator: Arc<dyn Navigator>) -> Result<Context> {
    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let credentials: Arc<dyn CredentialStore> = Arc::new(DurableCredentials::new(
        store,
        cfg.storage.credential_slot.clone(),
    ));

    let client = Arc::new(
        api::Client::new(
            credentials.clone(),
            api::ClientConfig {
                base_url: Some(cfg.api.base_url.clone()),
                user_agent: cfg.api.user_agent.clone(),
                timeout: Some(cfg.api.timeout),
                login_path: Some(cfg.api.login_path.clone()),
                http_client: None,
            },
        )
        .context("build api client")?,
    );

    let auth: Arc<dyn AuthService> = Arc::new(ApiAuthService::new(client.clone()));
    let feed_api: Arc<dyn FeedService> = Arc::new(ApiFeedService::new(client.clone()));
    let post_api: Arc<dyn PostService> = Arc::new(ApiPostService::new(client));

    let guard = Arc::new(Guard::new(credentials, navigator));
    let feed = Arc::new(Feed::new(feed_api, post_api.clone(), guard.clone()));
    let previews = Arc::new(TempPreviews::new(cfg.upload.preview_dir.clone()));
    let uploads = upload::Coordinator::new(post_api, previews, guard.clone(), feed.clone());
    let session = session::Manager::new(auth, guard);

    Ok(Context {
        session,
        feed,
        uploads,
    })
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = config::load(config::LoadOptions {
        config_file: cli.config.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let ctx = build(&cfg, Arc::new(TerminalNavigator))?;

    let ok = match cli.command {
        Command::Login { email, password } => login(&ctx, &email, password)?,
        Command::Register { email, password } => register(&ctx, &email, password)?,
        Command::Logout => {
            ctx.feed.reset();
            ctx.session.logout();
            println!("Signed out.");
            true
        }
        Command::Whoami => whoami(&ctx, cli.config.as_ref()),
        Command::Feed { mine, json } => {
            let scope = if mine { FeedScope::Mine } else { FeedScope::All };
            show_feed(&ctx, scope, json)?
        }
        Command::Upload { file, caption } => upload_file(&ctx, file, &caption)?,
        Command::Delete { id, yes } => {
            if yes {
                delete(&ctx, &id, &|_: &str| true)
            } else {
                delete(&ctx, &id, &TerminalConfirm)
            }
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn login(ctx: &Context, email: &str, password: Option<String>) -> Result<bool> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };
    match ctx.session.login(email, &password) {
        Ok(()) => {
            println!("Signed in as {email}.");
            Ok(true)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(false)
        }
    }
}

fn register(ctx: &Context, email: &str, password: Option<String>) -> Result<bool> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };
    match ctx.session.register(email, &password) {
        Ok(()) => {
            println!("Account created. Run `pixelshare login {email}` to sign in.");
            Ok(true)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(false)
        }
    }
}

fn whoami(ctx: &Context, config_path: Option<&PathBuf>) -> bool {
    let config_display = friendly_path(config_path.cloned().or_else(config::default_path).as_ref());
    if !ctx.session.guard().is_authenticated() {
        println!("Not signed in.\nConfig: {config_display}");
        return false;
    }
    match ctx.session.current_user() {
        Some(user) => println!("{} ({})\nConfig: {config_display}", user.email, user.id),
        None => println!("Signed in; account details unavailable.\nConfig: {config_display}"),
    }
    true
}

fn show_feed(ctx: &Context, scope: FeedScope, json: bool) -> Result<bool> {
    ctx.feed.set_scope(scope);
    let bar = spinner("Loading feed");
    let outcome = ctx
        .feed
        .refresh_in_background()
        .recv()
        .context("feed: refresh worker exited")?;
    bar.finish_and_clear();

    if outcome == RefreshOutcome::Redirected {
        return Ok(false);
    }

    let cache = ctx.feed.snapshot();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, cache.posts()).context("feed: encode json")?;
        writeln!(out)?;
        if let Some(message) = cache.error_message() {
            eprintln!("{message}");
        }
    } else {
        let user_id = ctx.session.current_user_id();
        render_feed(&mut out, &cache, user_id.as_deref())?;
    }
    Ok(matches!(outcome, RefreshOutcome::Loaded(_)))
}

fn upload_file(ctx: &Context, path: PathBuf, caption: &str) -> Result<bool> {
    let file = match MediaFile::open(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("{err}");
            return Ok(false);
        }
    };
    let file_name = file.file_name.clone();
    ctx.uploads
        .select_file(file)
        .context("upload: select file")?;
    ctx.uploads.set_caption(caption).context("upload: set caption")?;
    if let Some(preview) = ctx.uploads.snapshot().preview {
        tracing::debug!(path = %preview.display(), "upload: preview ready");
    }

    let bar = spinner(&format!("Uploading {file_name}"));
    let outcome = ctx.uploads.submit();
    bar.finish_and_clear();

    let ok = match outcome {
        SubmitOutcome::Committed(refresh) => {
            println!("Shared {file_name}.");
            if let RefreshOutcome::Loaded(_) = refresh {
                let user_id = ctx.session.current_user_id();
                let stdout = io::stdout();
                render_feed(&mut stdout.lock(), &ctx.feed.snapshot(), user_id.as_deref())?;
            }
            true
        }
        SubmitOutcome::Failed(message) => {
            eprintln!("{message}");
            false
        }
        SubmitOutcome::Redirected => false,
        SubmitOutcome::Rejected(reason) => {
            eprintln!("Upload not started ({reason:?}).");
            false
        }
    };
    ctx.uploads.cancel().ok();
    Ok(ok)
}

fn delete(ctx: &Context, id: &str, confirm: &dyn Confirm) -> bool {
    match ctx.feed.delete_post(id, confirm) {
        DeleteOutcome::Deleted => {
            println!("Post deleted.");
            true
        }
        DeleteOutcome::Cancelled => {
            println!("Kept the post.");
            true
        }
        DeleteOutcome::Redirected => false,
        DeleteOutcome::Failed(message) => {
            eprintln!("{message}");
            false
        }
    }
}

/// Writes the error banner, then the posts in cache order.
pub fn render_feed<W: Write>(out: &mut W, cache: &FeedCache, user_id: Option<&str>) -> io::Result<()> {
    if let Some(message) = cache.error_message() {
        writeln!(out, "! {message}\n")?;
    }
    if cache.posts().is_empty() {
        writeln!(out, "No posts yet")?;
        writeln!(out, "Be the first to share something!")?;
        return Ok(());
    }
    for post in cache.posts() {
        render_post(out, post, user_id)?;
    }
    Ok(())
}

fn render_post<W: Write>(out: &mut W, post: &Post, user_id: Option<&str>) -> io::Result<()> {
    let owned = if post.is_owned_by(user_id) { " · yours" } else { "" };
    writeln!(
        out,
        "{} · {} · {}{}",
        post.display_author(),
        post.created_at.format("%b %-d, %Y"),
        post.media_type(),
        owned
    )?;
    if !post.caption.trim().is_empty() {
        let options = textwrap::Options::new(76)
            .initial_indent("    ")
            .subsequent_indent("    ");
        writeln!(out, "{}", textwrap::fill(post.caption.trim(), options))?;
    }
    writeln!(out, "    {}", post.media_url)?;
    writeln!(out, "    id: {}\n", post.id)
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn to_login(&self, reason: Redirect) {
        match reason {
            Redirect::LoginRequired => {
                eprintln!("You are not signed in. Run `pixelshare login <email>` to continue.")
            }
            Redirect::SessionExpired => {
                eprintln!("Your session has expired. Run `pixelshare login <email>` to sign in again.")
            }
            Redirect::SignedOut => {}
        }
    }
}

struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt_text: &str) -> bool {
        match prompt(&format!("{prompt_text} [y/N] ")) {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/pixelshare/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Author;
    use crate::feed::LOAD_FAILED;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, user: &str, caption: &str) -> Post {
        Post {
            id: id.into(),
            caption: caption.into(),
            media_url: format!("https://cdn.example.test/{id}.jpg"),
            file_type: Some("image/jpeg".into()),
            file_name: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap(),
            author: Some(Author {
                id: Some(user.into()),
                email: Some(format!("{user}@example.test")),
            }),
            user_id: Some(user.into()),
        }
    }

    fn rendered(cache: &FeedCache, user: Option<&str>) -> String {
        let mut out = Vec::new();
        render_feed(&mut out, cache, user).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn empty_feed_invites_first_post() {
        let text = rendered(&FeedCache::default(), None);
        assert!(text.contains("No posts yet"));
    }

    #[test]
    fn marks_own_posts_only() {
        let mut cache = FeedCache::default();
        let ticket = cache.begin_load();
        cache.finish_load(
            ticket,
            Ok(vec![post("p1", "alice", "sunset"), post("p2", "bob", "")]),
        );
        let text = rendered(&cache, Some("alice"));
        let alice_line = text.lines().find(|l| l.starts_with("alice")).unwrap();
        let bob_line = text.lines().find(|l| l.starts_with("bob")).unwrap();
        assert!(alice_line.contains("yours"));
        assert!(!bob_line.contains("yours"));
        assert!(alice_line.contains("Mar 4, 2025"));
        assert!(text.contains("    sunset"));
        assert!(text.find("p1").unwrap() < text.find("p2").unwrap());
    }

    #[test]
    fn error_banner_precedes_posts() {
        let mut cache = FeedCache::default();
        let ticket = cache.begin_load();
        cache.finish_load(ticket, Err(LOAD_FAILED.into()));
        let text = rendered(&cache, None);
        assert!(text.starts_with(&format!("! {LOAD_FAILED}")));
    }

    #[test]
    fn friendly_path_defaults() {
        assert_eq!(friendly_path(None), "~/.config/pixelshare/config.yaml");
    }
}
