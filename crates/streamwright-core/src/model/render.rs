//! Progressive rendering support
//!
//! A renderer keeps the parts it has already drawn. Each pass computes the
//! content that should be visible now and diffs it position by position,
//! so only changed parts are redrawn.

use super::parts::{ContentReference, ResponsePart};
use super::response::ResponseModel;

/// One unit of renderable content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderContent {
    Part(ResponsePart),
    References(Vec<ContentReference>),
}

/// Something already drawn that can tell whether new content matches it
pub trait ContentPart {
    fn has_same_content(
        &self,
        content: &RenderContent,
        following: &[RenderContent],
        response_complete: bool,
    ) -> bool;
}

/// A drawn part, remembering what it drew
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPart {
    content: RenderContent,
    spinner: bool,
}

impl RenderedPart {
    pub fn new(content: RenderContent, following: &[RenderContent], response_complete: bool) -> Self {
        let spinner = shows_spinner(&content, following, response_complete);
        Self { content, spinner }
    }

    pub fn content(&self) -> &RenderContent {
        &self.content
    }

    pub fn has_spinner(&self) -> bool {
        self.spinner
    }
}

/// Progress messages spin only while they are the last thing shown
fn shows_spinner(content: &RenderContent, following: &[RenderContent], complete: bool) -> bool {
    matches!(content, RenderContent::Part(ResponsePart::ProgressMessage(_)))
        && following.is_empty()
        && !complete
}

impl ContentPart for RenderedPart {
    fn has_same_content(
        &self,
        content: &RenderContent,
        following: &[RenderContent],
        response_complete: bool,
    ) -> bool {
        match (&self.content, content) {
            (
                RenderContent::Part(ResponsePart::ProgressMessage(drawn)),
                RenderContent::Part(ResponsePart::ProgressMessage(next)),
            ) => {
                drawn == next && self.spinner == shows_spinner(content, following, response_complete)
            }
            (drawn, next) => drawn == next,
        }
    }
}

/// Per position: `None` when the drawn part still matches, else the content to draw
pub fn diff<P: ContentPart>(
    rendered: &[P],
    contents: &[RenderContent],
    response_complete: bool,
) -> Vec<Option<RenderContent>> {
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| match rendered.get(i) {
            Some(part) if part.has_same_content(content, &contents[i + 1..], response_complete) => {
                None
            }
            _ => Some(content.clone()),
        })
        .collect()
}

/// Everything that should be visible for a response right now
pub fn next_progressive_render_content(response: &ResponseModel) -> Vec<RenderContent> {
    let mut contents: Vec<RenderContent> = response
        .response()
        .parts()
        .iter()
        .cloned()
        .map(RenderContent::Part)
        .collect();
    let references = response.content_references();
    if !references.is_empty() {
        contents.push(RenderContent::References(references));
    }
    contents
}

fn word_count(contents: &[RenderContent]) -> usize {
    contents
        .iter()
        .map(|content| match content {
            RenderContent::Part(ResponsePart::Markdown(markdown)) => {
                markdown.value.split_whitespace().count()
            }
            _ => 0,
        })
        .sum()
}

/// Tracks drawn parts across render passes for one response
#[derive(Debug, Default)]
pub struct ProgressiveRenderer {
    rendered: Vec<RenderedPart>,
    rendered_word_count: usize,
}

impl ProgressiveRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one pass and return what had to be redrawn
    pub fn render(&mut self, response: &ResponseModel) -> Vec<Option<RenderContent>> {
        let contents = next_progressive_render_content(response);
        let complete = response.is_complete();
        let changes = diff(&self.rendered, &contents, complete);

        for (i, change) in changes.iter().enumerate() {
            if let Some(content) = change {
                let part = RenderedPart::new(content.clone(), &contents[i + 1..], complete);
                if i < self.rendered.len() {
                    self.rendered[i] = part;
                } else {
                    self.rendered.push(part);
                }
            }
        }
        self.rendered.truncate(contents.len());
        self.rendered_word_count = word_count(&contents);
        changes
    }

    pub fn rendered(&self) -> &[RenderedPart] {
        &self.rendered
    }

    pub fn rendered_word_count(&self) -> usize {
        self.rendered_word_count
    }
}
