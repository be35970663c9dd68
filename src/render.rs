//! Template renderer: fixed placeholder substitution in cached pages.
//!
//! Deliberately not a templating engine: no control flow, no partials, no
//! escaping. A fixed set of tokens is replaced globally and everything
//! else is passed through verbatim, so older templates with fewer tokens
//! keep working.

const TOKEN_INSTANCE_ID: &str = "${INSTANCE.ID}";
const TOKEN_PAGE_THEME: &str = "${PAGE.THEME}";
const TOKEN_PAGE_TITLE: &str = "${PROJECT.PAGE_TITLE}";
const TOKEN_PROJECT_TITLE: &str = "${PROJECT.TITLE}";
const TOKEN_PROJECT_SUBTITLE: &str = "${PROJECT.SUBTITLE}";
const TOKEN_FOOTER: &str = "${FOOTER}";

/// Token substituted into error pages by the error handler
pub const TOKEN_ERROR_MESSAGE: &str = "${ERROR.MESSAGE}";

/// Replace the placeholder tokens in `page`.
///
/// `project_subtitle` being `None` signals the older two-argument calling
/// convention: `project_title` is reinterpreted as the subtitle,
/// `page_title` as the project title, and the page title falls back to
/// the project title.
///
/// Pure and idempotent: rendering the output again with the same
/// arguments yields identical text, and unrecognized tokens are left
/// untouched.
pub fn render(
    page: &str,
    page_title: &str,
    project_title: &str,
    project_subtitle: Option<&str>,
    page_theme: Option<&str>,
    instance_id: &str,
    version: &str,
) -> String {
    let (page_title, project_title, project_subtitle) = match project_subtitle {
        Some(subtitle) => (page_title, project_title, subtitle),
        None => (page_title, page_title, project_title),
    };

    let theme = page_theme.unwrap_or("");
    let footer = footer_html(instance_id, version);

    let mut out = replace_token_ci(page, TOKEN_INSTANCE_ID, instance_id);
    out = replace_token_ci(&out, TOKEN_PAGE_THEME, theme);
    out = replace_token_ci(&out, TOKEN_PAGE_TITLE, page_title);
    out = replace_token_ci(&out, TOKEN_PROJECT_TITLE, project_title);
    out = replace_token_ci(&out, TOKEN_PROJECT_SUBTITLE, project_subtitle);
    out = replace_token_ci(&out, TOKEN_FOOTER, &footer);
    out
}

/// Fixed footer fragment: theme toggle, attribution with the schema
/// version, and the instance id
fn footer_html(instance_id: &str, version: &str) -> String {
    format!(
        "<div class=\"footer__modeswitch\"><div class=\"switch\"><div class=\"switch__slider\"></div></div></div>\
         <div class=\"footer__powered\">Powered by \
         <a href=\"https://github.com/ghifari160/splash\">Splash</a> v{version}</div>\
         <div class=\"footer__instance\">{instance_id}</div>"
    )
}

/// Replace every occurrence of an ASCII `token`, ignoring case
pub(crate) fn replace_token_ci(input: &str, token: &str, value: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = find_ci(rest, token) {
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    out
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}
