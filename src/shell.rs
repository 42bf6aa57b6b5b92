use std::{
    io::{self, Write},
    sync::Arc,
};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::{
    auth::{callback, AuthError, Authenticator, AuthorizationResponse},
    config::Config,
    drive::{gdrive::GDriveClient, DriveProvider},
    search::{search, SearchFilter},
    session::Session,
    summary,
    types::Category,
};

const PROMPT: &str = "drive-copilot> ";

const HELP: &str = "\
Commands:
  login                     connect to Google Drive
  callback <redirect-url>   finish a login by pasting the address you were sent to
  search <terms...>         search your Drive
  filter <category>         all, images, documents or spreadsheets
  details                   show every result of the last search
  previous                  show the last search at a glance
  refresh                   forget the current login and ask for a new one
  clear                     clear the last search results
  reset                     clear everything, including the login
  help                      show this message
  quit                      leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login,
    Callback(String),
    Search(String),
    Filter(Category),
    Details,
    Previous,
    Refresh,
    Clear,
    Reset,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one line of input. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "login" => Command::Login,
        "callback" if rest.is_empty() => return Err("usage: callback <redirect-url>".to_owned()),
        "callback" => Command::Callback(rest.to_owned()),
        "search" | "s" if rest.is_empty() => return Err("usage: search <terms...>".to_owned()),
        "search" | "s" => Command::Search(rest.to_owned()),
        "filter" => Command::Filter(rest.parse()?),
        "details" => Command::Details,
        "previous" | "prev" => Command::Previous,
        "refresh" => Command::Refresh,
        "clear" => Command::Clear,
        "reset" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(cmd))
}

/// Line-oriented front end over a [`Session`].
pub struct Shell<W: Write> {
    config: Config,
    session: Session,
    authenticator: Option<Arc<Authenticator>>,
    category: Category,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(config: Config, out: W) -> Shell<W> {
        Shell {
            config,
            session: Session::new(),
            authenticator: None,
            category: Category::All,
            out,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(&mut self) -> io::Result<()> {
        writeln!(self.out, "Drive Copilot: search your Google Drive. Type 'help' for commands.")?;
        writeln!(
            self.out,
            "Do not reuse a login redirect address. If login fails, run 'reset' and try again."
        )?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            write!(self.out, "{PROMPT}")?;
            self.out.flush()?;

            let line = match lines.next_line().await? {
                Some(line) => line,
                None => break,
            };

            match parse_command(&line) {
                Ok(Some(cmd)) => {
                    if self.handle(cmd).await? == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => (),
                Err(e) => writeln!(self.out, "{e}")?,
            }
        }
        Ok(())
    }

    pub async fn handle(&mut self, cmd: Command) -> io::Result<Flow> {
        debug!("handling {cmd:?}");
        match cmd {
            Command::Login => self.login().await?,
            Command::Callback(redirect) => self.callback(&redirect).await?,
            Command::Search(query) => self.search(&query).await?,
            Command::Filter(category) => {
                self.category = category;
                writeln!(self.out, "File type filter: {category}")?;
            }
            Command::Details => match self.session.last_search() {
                Some(last) if !last.results.is_empty() => {
                    write!(self.out, "{}", summary::render_details(&last.results))?
                }
                _ => writeln!(self.out, "No results to show.")?,
            },
            Command::Previous => match self.session.last_search() {
                Some(last) if !last.results.is_empty() => {
                    writeln!(self.out, "Previous search: '{}'", last.query)?;
                    writeln!(self.out, "Files found: {}", last.results.len())?;
                    write!(self.out, "{}", summary::render_previous(&last.results))?;
                }
                _ => writeln!(self.out, "No previous results.")?,
            },
            Command::Refresh => {
                self.session.drop_credentials();
                writeln!(self.out, "Login cleared. Run 'login' to connect again.")?;
            }
            Command::Clear => {
                self.session.clear_results();
                writeln!(self.out, "Results cleared.")?;
            }
            Command::Reset => {
                self.session.reset();
                self.authenticator = None;
                self.category = Category::All;
                writeln!(self.out, "Session reset.")?;
            }
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn authenticator(&mut self) -> Result<Arc<Authenticator>, AuthError> {
        if let Some(auth) = &self.authenticator {
            return Ok(auth.clone());
        }
        let auth = Arc::new(Authenticator::new(&self.config.google)?);
        self.authenticator = Some(auth.clone());
        Ok(auth)
    }

    async fn login(&mut self) -> io::Result<()> {
        let auth = match self.authenticator() {
            Ok(auth) => auth,
            Err(e) => {
                writeln!(self.out, "❌ {e}")?;
                return Ok(());
            }
        };

        let url = self.session.begin_login(&auth);
        writeln!(self.out, "Open this address in your browser to connect Google Drive:\n\n  {url}\n")?;

        if !self.config.google.listen_for_callback {
            writeln!(
                self.out,
                "After granting access, paste the address you were redirected to with: callback <url>"
            )?;
            return Ok(());
        }

        self.out.flush()?;
        match callback::wait_for_redirect(auth.redirect_uri(), self.config.http.callback_timeout())
            .await
        {
            Ok(response) => self.finish_login(&auth, response).await,
            Err(e) => writeln!(
                self.out,
                "❌ {e}\nYou can still paste the redirect address with: callback <url>"
            ),
        }
    }

    async fn callback(&mut self, redirect: &str) -> io::Result<()> {
        let auth = match self.authenticator() {
            Ok(auth) => auth,
            Err(e) => return writeln!(self.out, "❌ {e}"),
        };
        match AuthorizationResponse::parse_redirect(redirect) {
            Ok(response) => self.finish_login(&auth, response).await,
            Err(e) => writeln!(self.out, "❌ {e}"),
        }
    }

    async fn finish_login(
        &mut self,
        auth: &Authenticator,
        response: AuthorizationResponse,
    ) -> io::Result<()> {
        match self.session.complete_login(auth, response).await {
            Ok(()) => writeln!(self.out, "✅ Successfully connected to Google Drive!"),
            Err(e) => writeln!(self.out, "❌ Authentication failed: {e}"),
        }
    }

    async fn search(&mut self, query: &str) -> io::Result<()> {
        let credentials = match self.session.credentials() {
            Some(credentials) => credentials,
            None => {
                return writeln!(
                    self.out,
                    "Please authenticate with Google Drive to continue (run 'login')."
                )
            }
        };
        let auth = match self.authenticator() {
            Ok(auth) => auth,
            Err(e) => return writeln!(self.out, "❌ {e}"),
        };
        let client = match GDriveClient::new(&self.config.http, auth, credentials) {
            Ok(client) => client,
            Err(e) => return writeln!(self.out, "❌ {e}"),
        };

        self.search_with(&client, query).await
    }

    /// Run a search against `provider` and show the outcome.
    pub async fn search_with(&mut self, provider: &dyn DriveProvider, query: &str) -> io::Result<()> {
        let filter = SearchFilter::new(query, self.category);
        writeln!(self.out, "Searching your Drive...")?;
        self.out.flush()?;

        let report = search(provider, &filter, &self.config.search).await;

        if let Some(e) = &report.listing_error {
            writeln!(self.out, "Error listing files: {e}")?;
        }
        if !report.skipped.is_empty() {
            writeln!(
                self.out,
                "{} file(s) could not be read and were skipped:",
                report.skipped.len()
            )?;
            for skipped in &report.skipped {
                writeln!(self.out, "  - {}: {}", skipped.file.name, skipped.reason)?;
            }
        }

        if report.results.is_empty() {
            writeln!(self.out, "No relevant files found. Try a different search term.")?;
        } else {
            writeln!(self.out, "Found {} relevant files!\n", report.results.len())?;
            write!(self.out, "{}", summary::render_details(&report.results))?;
            writeln!(self.out, "Summary\n")?;
            writeln!(self.out, "{}", summary::render(query, &report.results))?;
        }

        info!("search for '{query}' returned {} result(s)", report.results.len());
        self.session.record_search(query, report.results);
        Ok(())
    }
}
