//! Stylesheet reference rewriting.
//!
//! Walks cssparser tokens so only real `url(...)` references are rewritten,
//! including nested `url()` calls inside other functions and blocks
//! (`image-set`, `@media`, `@supports`). Strings and comments are preserved
//! verbatim. `@import "sheet.css"` string-form targets are rewritten as well,
//! since a surviving import would pull from the remote origin.

use cssparser::{Parser, ParserInput, Token};

/// Placeholder emitted for references that cannot be resolved locally.
///
/// A dropped reference must not point offsite and must stay syntactically
/// valid in every property position, so the empty data URL is used: it is a
/// well-formed `url()` argument that triggers no network traffic.
pub const DROPPED_URL: &str = "data:,";

/// Rewrite every `url(...)` (and string-form `@import`) reference in `css`.
///
/// `resolve` maps the raw reference text to its local replacement; returning
/// `None` drops the reference (replaced with [`DROPPED_URL`]). `data:`
/// references are passed through untouched without consulting the resolver.
pub fn rewrite_css_urls<F>(css: &str, resolve: &mut F) -> String
where
  F: FnMut(&str) -> Option<String>,
{
  let mut input = ParserInput::new(css);
  let mut parser = Parser::new(&mut input);
  rewrite_urls_in_parser(&mut parser, css.len(), resolve)
}

fn replacement_for<F>(raw: &str, resolve: &mut F) -> Option<String>
where
  F: FnMut(&str) -> Option<String>,
{
  let trimmed = raw.trim();
  if trimmed.is_empty() || trimmed.starts_with("data:") || trimmed.starts_with('#') {
    return None;
  }
  Some(resolve(trimmed).unwrap_or_else(|| DROPPED_URL.to_string()))
}

fn escape_url_for_css(url: &str) -> String {
  let mut escaped = String::with_capacity(url.len());
  for ch in url.chars() {
    match ch {
      '"' => escaped.push_str("\\\""),
      '\\' => escaped.push_str("\\\\"),
      '\n' => escaped.push_str("\\0a "),
      '\r' => escaped.push_str("\\0d "),
      '\t' => escaped.push_str("\\09 "),
      _ => escaped.push(ch),
    }
  }
  escaped
}

fn rewrite_urls_in_parser<'i, F>(
  parser: &mut Parser<'i, '_>,
  capacity_hint: usize,
  resolve: &mut F,
) -> String
where
  F: FnMut(&str) -> Option<String>,
{
  let mut out = String::with_capacity(capacity_hint);
  let mut last_emitted = parser.position();
  // Set right after `@import`, so the following quoted string is treated as a
  // reference rather than an ordinary string literal.
  let mut pending_import = false;

  while !parser.is_exhausted() {
    let token_start = parser.position();
    let token = match parser.next_including_whitespace_and_comments() {
      Ok(t) => t.clone(),
      Err(_) => break,
    };

    match token {
      Token::UnquotedUrl(url_value) => {
        pending_import = false;
        let url_value = url_value.as_ref().to_string();
        let token_text = parser.slice_from(token_start);
        let chunk = parser.slice_from(last_emitted);
        let prefix_len = chunk.len().saturating_sub(token_text.len());
        out.push_str(&chunk[..prefix_len]);

        if let Some(local) = replacement_for(&url_value, resolve) {
          out.push_str(&format!("url(\"{}\")", escape_url_for_css(&local)));
        } else {
          out.push_str(token_text);
        }
        last_emitted = parser.position();
      }
      Token::QuotedString(value) if pending_import => {
        pending_import = false;
        let value = value.as_ref().to_string();
        let token_text = parser.slice_from(token_start);
        let chunk = parser.slice_from(last_emitted);
        let prefix_len = chunk.len().saturating_sub(token_text.len());
        out.push_str(&chunk[..prefix_len]);

        if let Some(local) = replacement_for(&value, resolve) {
          out.push_str(&format!("url(\"{}\")", escape_url_for_css(&local)));
        } else {
          out.push_str(token_text);
        }
        last_emitted = parser.position();
      }
      Token::AtKeyword(ref name) if name.eq_ignore_ascii_case("import") => {
        pending_import = true;
      }
      Token::WhiteSpace(_) | Token::Comment(_) => {}
      Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
        pending_import = false;
        let parse_result = parser.parse_nested_block(|nested| {
          let mut arg: Option<String> = None;
          while !nested.is_exhausted() {
            match nested.next_including_whitespace_and_comments() {
              Ok(Token::WhiteSpace(_)) | Ok(Token::Comment(_)) => {}
              Ok(Token::QuotedString(s)) | Ok(Token::UnquotedUrl(s)) => {
                arg = Some(s.as_ref().to_string());
              }
              Ok(Token::BadUrl(_)) => {
                arg = None;
              }
              Ok(_) => {}
              Err(_) => break,
            }
          }
          Ok::<_, cssparser::ParseError<'i, ()>>(arg)
        });

        let block_text = parser.slice_from(token_start);
        let chunk = parser.slice_from(last_emitted);
        let prefix_len = chunk.len().saturating_sub(block_text.len());
        out.push_str(&chunk[..prefix_len]);

        if let Ok(Some(url_arg)) = parse_result {
          if let Some(local) = replacement_for(&url_arg, resolve) {
            out.push_str(&format!("url(\"{}\")", escape_url_for_css(&local)));
            last_emitted = parser.position();
            continue;
          }
        }

        out.push_str(block_text);
        last_emitted = parser.position();
      }
      Token::Function(_)
      | Token::ParenthesisBlock
      | Token::SquareBracketBlock
      | Token::CurlyBracketBlock => {
        pending_import = false;
        let parse_result = parser.parse_nested_block(|nested| {
          let start = nested.position();
          let rewritten = rewrite_urls_in_parser(nested, 0, resolve);
          let original = nested.slice_from(start);
          let changed = rewritten != original;
          Ok::<_, cssparser::ParseError<'i, ()>>((rewritten, original.len(), changed))
        });

        let block_text = parser.slice_from(token_start);
        let chunk = parser.slice_from(last_emitted);
        let prefix_len = chunk.len().saturating_sub(block_text.len());
        out.push_str(&chunk[..prefix_len]);

        if let Ok((inner_rewritten, inner_len, changed)) = parse_result {
          const CLOSING_LEN: usize = 1;
          if !changed {
            out.push_str(block_text);
            last_emitted = parser.position();
            continue;
          }
          if block_text.len() >= inner_len + CLOSING_LEN {
            let open_len = block_text.len() - inner_len - CLOSING_LEN;
            let (open_part, _) = block_text.split_at(open_len);
            let close_part = &block_text[block_text.len() - CLOSING_LEN..];
            out.push_str(open_part);
            out.push_str(&inner_rewritten);
            out.push_str(close_part);
            last_emitted = parser.position();
            continue;
          }
        }

        out.push_str(block_text);
        last_emitted = parser.position();
      }
      _ => {
        pending_import = false;
      }
    }
  }

  out.push_str(parser.slice_from(last_emitted));
  out
}
