//! Responsive source-set list rewriting.
//!
//! `srcset` values are comma-separated candidates of the form
//! `<url> [<descriptor>]`. Each candidate URL is resolved through the caller's
//! mapping; candidates that cannot be resolved locally are dropped so no
//! remote reference survives. Candidate count is capped so pathological
//! attribute values stay bounded.

const MAX_SRCSET_CANDIDATES: usize = 16;

/// Rewrite a srcset attribute value.
///
/// `resolve` maps a raw candidate URL to its local replacement; `None` drops
/// the candidate. Returns `None` when no candidate survives, which callers
/// treat as "remove the attribute". `data:` candidates pass through untouched.
pub fn rewrite_srcset<F>(srcset: &str, mut resolve: F) -> Option<String>
where
  F: FnMut(&str) -> Option<String>,
{
  let mut out: Vec<String> = Vec::new();

  for candidate in srcset.split(',') {
    if out.len() >= MAX_SRCSET_CANDIDATES {
      break;
    }
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
      continue;
    }

    let mut tokens = trimmed.split_whitespace();
    let url = match tokens.next() {
      Some(u) => u,
      None => continue,
    };
    let descriptor = tokens.collect::<Vec<_>>().join(" ");

    let replacement = if url.starts_with("data:") {
      Some(url.to_string())
    } else {
      resolve(url)
    };

    if let Some(local) = replacement {
      if descriptor.is_empty() {
        out.push(local);
      } else {
        out.push(format!("{local} {descriptor}"));
      }
    }
  }

  if out.is_empty() {
    None
  } else {
    Some(out.join(", "))
  }
}
