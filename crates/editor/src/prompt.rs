//! Instruction text sent to the generator.
//!
//! A whole-document request carries the full sanitized markup; a snippet
//! request carries only the target's outer HTML and asks for that snippet
//! back.

const ROLE: &str = "\
You are helping recreate a web page design as HTML and refine it over several iterations.

Code style:
- Use TailwindCSS utility classes; extend the theme with the exact colors of the design.
- Annotate sections with comments, ids and aria-labels.
- Do not use JavaScript.
- Do not use real images; use icons or placeholder blocks of the same size.
- Indent with 2 spaces.
";

const WHOLE_DOCUMENT: &str = "\
Return a complete HTML document. Load TailwindCSS with:
<script src=\"https://cdn.tailwindcss.com\"></script>
";

const SNIPPET: &str = "\
You are given a snippet of a larger page. Nothing needs to be imported.
Modify only the snippet and return only the snippet, never a full document.
";

const DESIGN_IMAGE: &str = "\
The attached image is the design being recreated. Match it as closely as possible: \
layout, colors, icons, border radii and dividers.
";

const REGION_IMAGES: &str = "\
The first image is a zoomed-in area of the design; changes should target this area.
The second image is the same area as the current code renders it. Use the differences \
between the two and the feedback below to bring the second closer to the first.
";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptScope {
    WholeDocument,
    Snippet,
}

/// Builds the generator prompt.
///
/// `code` is the full sanitized document or the target snippet, depending on
/// `scope`. `image_count` selects the image description: one image is the
/// full design, two are a reference/current region pair.
pub fn compose(scope: PromptScope, code: &str, feedback: &str, image_count: usize) -> String {
    let mut out = String::with_capacity(ROLE.len() + code.len() + feedback.len() + 512);
    out.push_str(ROLE);
    out.push('\n');
    out.push_str(match scope {
        PromptScope::WholeDocument => WHOLE_DOCUMENT,
        PromptScope::Snippet => SNIPPET,
    });
    match image_count {
        0 => {}
        1 => {
            out.push('\n');
            out.push_str(DESIGN_IMAGE);
        }
        _ => {
            out.push('\n');
            out.push_str(REGION_IMAGES);
        }
    }
    out.push_str("\nCurrent HTML:\n\n```html\n");
    out.push_str(code.trim());
    out.push_str("\n```\n\nFeedback to address:\n\n");
    out.push_str(feedback.trim());
    out.push_str("\n\nRespond only with the HTML code. Do not use markdown.\n");
    out
}

/// Feedback used for the first pass over an empty document.
pub const FIRST_ITERATION: &str = "\
This is the first iteration; only the design is provided. Later iterations will revise \
the result, so keep the code clean and organized. Start from the large components: \
layouts, sections, navigation, sidebars, tables, cards and footers.";
