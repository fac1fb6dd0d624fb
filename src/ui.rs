//! Server-rendered HTML for the search page.

use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::papers::Paper;
use crate::search::{SearchOutcome, SearchResults};

pub const APP_TITLE: &str = "Abstract search";

pub const DESCRIPTION: &str = "This app demonstrates a semantic search functionality by using the \
entered search term to return the ArXiv abstracts closest to it.";

/// Shown instead of results when the query is blank.
pub const EMPTY_QUERY_MESSAGE: &str = "Empty query: please enter a search term.";

/// Characters of the abstract shown per result.
pub const ABSTRACT_PREVIEW_CHARS: usize = 200;

const STYLE: &str = "body{font-family:sans-serif;max-width:1100px;margin:2rem auto;padding:0 1rem}\
.columns{display:flex;gap:2rem}.column{flex:1;min-width:0}\
li{margin-bottom:1rem}.error{color:#b00020}";

/// What the page shows under the form.
#[derive(Debug, Clone, Copy)]
pub enum PageBody<'a> {
    /// Form only.
    Blank,
    Outcome(&'a SearchOutcome),
    /// The search failed with this message.
    Failure(&'a str),
}

/// One result: linked title, authors, and the start of the abstract.
pub fn prettify(paper: &Paper) -> String {
    let preview: String = paper.summary.chars().take(ABSTRACT_PREVIEW_CHARS).collect();
    format!(
        "<a href=\"{}\">{}</a><br><small><em>{}</em></small><br><strong>Abstract</strong>: {}...",
        encode_double_quoted_attribute(&paper.id),
        encode_text(&paper.title),
        encode_text(&paper.authors_line()),
        encode_text(&preview),
    )
}

/// Full page for `query` with `body` below the form.
pub fn render_page(query: &str, body: PageBody<'_>) -> String {
    let mut html = String::with_capacity(8 * 1024);
    let _ = write!(
        html,
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{title}</title><style>{STYLE}</style></head><body>\
         <h1>{title}</h1><p>{description}</p>\
         <form action=\"/search\" method=\"get\">\
         <label for=\"q\">Search ArXiv abstracts:</label> \
         <input id=\"q\" name=\"q\" type=\"text\" value=\"{value}\"> \
         <button type=\"submit\">Search</button></form>",
        title = encode_text(APP_TITLE),
        description = encode_text(DESCRIPTION),
        value = encode_double_quoted_attribute(query),
    );
    match body {
        PageBody::Blank => {}
        PageBody::Outcome(SearchOutcome::EmptyQuery) => error_line(&mut html, EMPTY_QUERY_MESSAGE),
        PageBody::Outcome(SearchOutcome::Results(results)) => render_results(&mut html, results),
        PageBody::Failure(message) => error_line(&mut html, message),
    }
    html.push_str("</body></html>");
    html
}

fn error_line(html: &mut String, message: &str) {
    let _ = write!(html, "<p class=\"error\">{}</p>", encode_text(message));
}

fn render_results(html: &mut String, results: &SearchResults) {
    html.push_str("<div class=\"columns\">");
    if let Some(keyword) = &results.keyword {
        render_column(html, "Ordinary search", keyword.iter());
    }
    render_column(
        html,
        "Semantic search",
        results.semantic.iter().map(|hit| &hit.paper),
    );
    html.push_str("</div>");
}

fn render_column<'a>(html: &mut String, heading: &str, papers: impl Iterator<Item = &'a Paper>) {
    let _ = write!(html, "<section class=\"column\"><h2>{}</h2>", encode_text(heading));
    let mut items = papers.map(prettify).peekable();
    if items.peek().is_none() {
        html.push_str("<p>No results.</p>");
    } else {
        html.push_str("<ol>");
        for item in items {
            let _ = write!(html, "<li>{item}</li>");
        }
        html.push_str("</ol>");
    }
    html.push_str("</section>");
}
