//! Plain terminal output for the CLI.
//!
//! Everything that came from the backend or a third party passes through
//! [`sanitize_for_terminal`] before it is printed.

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Arc;

use crossterm::style::{Attribute, Color, Stylize};

use crate::api::{Analysis, DashboardStats, Sentiment, User};
use crate::cache::CacheState;
use crate::dashboard::Loaded;
use crate::theme::Palette;
use crate::util::{fit_width, pad_to_width, sanitize_for_terminal};

const ID_WIDTH: usize = 6;
const DATE_WIDTH: usize = 16;
const SENTIMENT_WIDTH: usize = 9;
const COUNT_WIDTH: usize = 9;
const MIN_URL_WIDTH: usize = 20;
const COMMENT_WIDTH: usize = 96;

pub struct Renderer<W> {
    out: W,
    palette: Palette,
    color: bool,
    width: usize,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, palette: Palette, color: bool, width: usize) -> Self {
        Self {
            out,
            palette,
            color,
            width,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&mut self, text: impl Display, color: Color) -> io::Result<()> {
        if self.color {
            write!(self.out, "{}", text.to_string().with(color))
        } else {
            write!(self.out, "{text}")
        }
    }

    fn heading(&mut self, text: &str) -> io::Result<()> {
        if self.color {
            writeln!(
                self.out,
                "{}",
                text.with(self.palette.heading).attribute(Attribute::Bold)
            )
        } else {
            writeln!(self.out, "{text}")
        }
    }

    fn sentiment_cell(&mut self, sentiment: Option<Sentiment>, width: usize) -> io::Result<()> {
        let label = sentiment.map_or("pending", Sentiment::label);
        let color = sentiment.map_or(self.palette.muted, |s| self.palette.sentiment(s));
        self.paint(pad_to_width(label, width), color)
    }

    // ------------------------------------------------------------------------
    // Pages
    // ------------------------------------------------------------------------

    pub fn history(&mut self, page: &Loaded<Arc<Vec<Analysis>>>) -> io::Result<()> {
        let analyses = page.value.as_slice();
        if analyses.is_empty() {
            writeln!(self.out, "No analyses yet. Run `postpulse analyze <url>` to start one.")?;
            return self.freshness(page.state, page.error.as_ref());
        }

        let fixed = ID_WIDTH + DATE_WIDTH + SENTIMENT_WIDTH + COUNT_WIDTH + 4;
        let url_width = self.width.saturating_sub(fixed).max(MIN_URL_WIDTH);

        let header = format!(
            "{} {} {} {} {}",
            pad_to_width("ID", ID_WIDTH),
            pad_to_width("Created", DATE_WIDTH),
            pad_to_width("Sentiment", SENTIMENT_WIDTH),
            pad_to_width("Comments", COUNT_WIDTH),
            "Post"
        );
        self.heading(&header)?;

        for analysis in analyses {
            write!(self.out, "{} ", pad_to_width(&analysis.id.to_string(), ID_WIDTH))?;
            let created = analysis.created_at.format("%Y-%m-%d %H:%M").to_string();
            self.paint(pad_to_width(&created, DATE_WIDTH), self.palette.muted)?;
            write!(self.out, " ")?;
            self.sentiment_cell(analysis.overall_sentiment, SENTIMENT_WIDTH)?;
            write!(
                self.out,
                " {} ",
                pad_to_width(&analysis.total_comments.to_string(), COUNT_WIDTH)
            )?;
            let url = sanitize_for_terminal(&analysis.post_url);
            writeln!(self.out, "{}", fit_width(&url, url_width))?;
        }
        self.freshness(page.state, page.error.as_ref())
    }

    pub fn analysis(&mut self, page: &Loaded<Arc<Analysis>>, comments: bool) -> io::Result<()> {
        let analysis = &*page.value;
        self.heading(&format!("Analysis #{}", analysis.id))?;
        writeln!(self.out, "Post:      {}", sanitize_for_terminal(&analysis.post_url))?;
        writeln!(
            self.out,
            "Created:   {}",
            analysis.created_at.format("%Y-%m-%d %H:%M UTC")
        )?;
        write!(self.out, "Overall:   ")?;
        self.sentiment_cell(analysis.overall_sentiment, SENTIMENT_WIDTH)?;
        match analysis.overall_score {
            Some(score) => writeln!(self.out, " ({score:.2})")?,
            None => writeln!(self.out)?,
        }
        writeln!(self.out, "Comments:  {}", analysis.total_comments)?;
        self.breakdown(
            analysis.positive_count,
            analysis.neutral_count,
            analysis.negative_count,
            analysis.total_comments,
        )?;

        if comments {
            writeln!(self.out)?;
            if analysis.comments.is_empty() {
                self.paint("No comments returned.", self.palette.muted)?;
                writeln!(self.out)?;
            }
            for comment in &analysis.comments {
                self.sentiment_cell(Some(comment.sentiment), SENTIMENT_WIDTH)?;
                let text = sanitize_for_terminal(&comment.comment_text).replace('\n', " ");
                writeln!(
                    self.out,
                    " {:>5.2}  {}",
                    comment.score,
                    fit_width(&text, COMMENT_WIDTH)
                )?;
            }
        }
        self.freshness(page.state, page.error.as_ref())
    }

    pub fn stats(&mut self, page: &Loaded<DashboardStats>) -> io::Result<()> {
        let stats = &page.value;
        self.heading("Overview")?;
        writeln!(self.out, "Analyses:  {}", stats.total_analyses)?;
        writeln!(self.out, "Comments:  {}", stats.total_comments)?;
        self.breakdown(
            stats.total_positive,
            stats.total_neutral,
            stats.total_negative,
            stats.total_comments,
        )?;
        if let Some(rate) = stats.positive_rate() {
            writeln!(self.out, "Positive rate: {rate:.1}%")?;
        }
        self.freshness(page.state, page.error.as_ref())
    }

    pub fn user(&mut self, page: &Loaded<Arc<User>>) -> io::Result<()> {
        let user = &*page.value;
        write!(self.out, "Signed in as {}", sanitize_for_terminal(&user.email))?;
        if let Some(name) = &user.full_name {
            write!(self.out, " ({})", sanitize_for_terminal(name))?;
        }
        writeln!(self.out)?;
        self.freshness(page.state, page.error.as_ref())
    }

    fn breakdown(&mut self, positive: u64, neutral: u64, negative: u64, total: u64) -> io::Result<()> {
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total as f64
            }
        };
        for (sentiment, count) in [
            (Sentiment::Positive, positive),
            (Sentiment::Neutral, neutral),
            (Sentiment::Negative, negative),
        ] {
            write!(self.out, "  ")?;
            self.sentiment_cell(Some(sentiment), SENTIMENT_WIDTH)?;
            writeln!(self.out, " {count:>6}  {:>5.1}%", pct(count))?;
        }
        Ok(())
    }

    /// Note stale or failed-refresh data under a page.
    fn freshness(&mut self, state: CacheState, error: Option<&impl Display>) -> io::Result<()> {
        match (state, error) {
            (_, Some(err)) => {
                self.paint(format!("Showing saved data: {err}"), self.palette.accent)?;
                writeln!(self.out)
            }
            (CacheState::Stale, None) => {
                self.paint("Data may be out of date.", self.palette.muted)?;
                writeln!(self.out)
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub fn success(&mut self, message: &str) -> io::Result<()> {
        self.paint(message, self.palette.positive)?;
        writeln!(self.out)
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        self.paint(format!("Error: {message}"), self.palette.error)?;
        writeln!(self.out)
    }

    pub fn info(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{message}")
    }
}
