//! Signature-based detection of runtime scripts that cannot work offline.
//!
//! Two categories are stripped from snapshots: framework hydration bootstraps
//! (SPA client routers that re-render or navigate against an origin server)
//! and smooth-scroll libraries (which hijack the scroll container and leave a
//! blank page when their runtime is absent). Detection is a maintained
//! signature list over script URLs and inline bodies, not execution analysis;
//! it will miss novel libraries, which is why the matcher is a pluggable
//! capability rather than a hard-coded check inside the rewrite pass.

/// One recognizable script family.
///
/// A signature matches either by `src` URL substring or by inline source
/// substring, case-insensitively. An allowlist carve-out lets benign
/// third-party tags (analytics, chat widgets) survive even when a broad
/// hydration pattern would otherwise catch them.
pub trait ScriptSignature: Send + Sync {
  /// Human-readable family name, used in logs.
  fn name(&self) -> &str;

  /// Does a `script src="..."` URL belong to this family?
  fn matches_src(&self, src: &str) -> bool;

  /// Does an inline script body belong to this family?
  fn matches_inline(&self, source: &str) -> bool;
}

/// Substring-list signature, sufficient for every family currently known.
pub struct SubstringSignature {
  name: &'static str,
  src_needles: &'static [&'static str],
  inline_needles: &'static [&'static str],
}

impl ScriptSignature for SubstringSignature {
  fn name(&self) -> &str {
    self.name
  }

  fn matches_src(&self, src: &str) -> bool {
    let src = src.to_ascii_lowercase();
    self.src_needles.iter().any(|n| src.contains(n))
  }

  fn matches_inline(&self, source: &str) -> bool {
    let source = source.to_ascii_lowercase();
    self.inline_needles.iter().any(|n| source.contains(n))
  }
}

/// Third-party script hosts that stay functional (or harmlessly inert) offline
/// and must survive stripping even when a framework pattern matches their URL.
const SAFE_SRC_NEEDLES: &[&str] = &[
  "googletagmanager",
  "google-analytics",
  "gtag",
  "facebook",
  "hotjar",
  "clarity",
  "segment",
  "mixpanel",
  "amplitude",
  "hubspot",
  "intercom",
  "crisp",
  "drift",
];

const HYDRATION: SubstringSignature = SubstringSignature {
  name: "framework-hydration",
  src_needles: &[
    "_next/",
    "_nuxt/",
    "webpack-runtime",
    "component---",
    "page-data/",
  ],
  inline_needles: &[
    "__next_data__",
    "self.__next",
    "__nuxt__",
    "___gatsby",
    "window.___webpackcompilationhash",
    "hydrateroot(",
    "reactdom.hydrate",
    "pagedata",
  ],
};

const SMOOTH_SCROLL: SubstringSignature = SubstringSignature {
  name: "smooth-scroll",
  src_needles: &["lenis", "locomotive-scroll", "smooth-scroll", "smooth-scrollbar"],
  inline_needles: &["new lenis", "new locomotivescroll", "smoothscroll"],
};

/// The maintained set of signatures applied by the rewrite pass.
pub struct SignatureSet {
  signatures: Vec<Box<dyn ScriptSignature>>,
}

impl SignatureSet {
  /// The built-in signature list: framework hydration plus smooth scroll.
  pub fn builtin() -> Self {
    Self {
      signatures: vec![Box::new(HYDRATION), Box::new(SMOOTH_SCROLL)],
    }
  }

  /// An empty set, for callers that want snapshots with scripts untouched.
  pub fn empty() -> Self {
    Self { signatures: Vec::new() }
  }

  /// Extend with a custom signature.
  pub fn push(&mut self, signature: Box<dyn ScriptSignature>) {
    self.signatures.push(signature);
  }

  /// Match a `script src` URL. Safe third-party hosts are never matched.
  pub fn match_src(&self, src: &str) -> Option<&str> {
    let lowered = src.to_ascii_lowercase();
    if SAFE_SRC_NEEDLES.iter().any(|n| lowered.contains(n)) {
      return None;
    }
    self
      .signatures
      .iter()
      .find(|s| s.matches_src(src))
      .map(|s| s.name())
  }

  /// Match an inline script body.
  pub fn match_inline(&self, source: &str) -> Option<&str> {
    self
      .signatures
      .iter()
      .find(|s| s.matches_inline(source))
      .map(|s| s.name())
  }
}

impl Default for SignatureSet {
  fn default() -> Self {
    Self::builtin()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_next_chunks_by_src() {
    let set = SignatureSet::builtin();
    assert_eq!(
      set.match_src("/_next/static/chunks/main-7693bd4f.js"),
      Some("framework-hydration")
    );
    assert_eq!(
      set.match_src("https://cdn.example.com/lenis@1.0.42/dist/lenis.min.js"),
      Some("smooth-scroll")
    );
  }

  #[test]
  fn matches_inline_hydration_payloads() {
    let set = SignatureSet::builtin();
    assert_eq!(
      set.match_inline(r#"self.__next_f.push([1,"chunk"])"#),
      Some("framework-hydration")
    );
    assert_eq!(set.match_inline("const lenis = new Lenis();"), Some("smooth-scroll"));
  }

  #[test]
  fn unrelated_scripts_are_not_matched() {
    let set = SignatureSet::builtin();
    assert_eq!(set.match_src("/js/carousel.js"), None);
    assert_eq!(set.match_inline("document.title = 'hi';"), None);
  }

  #[test]
  fn analytics_hosts_survive_even_with_framework_needles() {
    let set = SignatureSet::builtin();
    assert_eq!(set.match_src("https://www.googletagmanager.com/gtag/js?id=G-APP-1"), None);
  }

  #[test]
  fn custom_signatures_extend_the_set() {
    struct Custom;
    impl ScriptSignature for Custom {
      fn name(&self) -> &str {
        "custom"
      }
      fn matches_src(&self, src: &str) -> bool {
        src.contains("my-router")
      }
      fn matches_inline(&self, _source: &str) -> bool {
        false
      }
    }

    let mut set = SignatureSet::empty();
    set.push(Box::new(Custom));
    assert_eq!(set.match_src("/js/my-router.js"), Some("custom"));
  }
}
