//! The capture-to-local transformation.
//!
//! Consumes the rendered document, the resource cache, and the recorded
//! iframe fragments; produces the local snapshot tree. The pass is
//! deterministic and idempotent: rewriting the same captured set twice yields
//! byte-identical output and identical path assignments.
//!
//! Reference handling is resolve-or-drop. A reference whose target exists in
//! the cache is rewritten to its local asset path; one whose target was never
//! captured is removed outright, never left pointing at the remote origin.
//! Navigational `<a>` links are the single exception and pass through
//! untouched.

pub mod css;
pub mod scripts;
pub mod srcset;

use crate::archive::SnapshotTree;
use crate::assets::{AssetClass, AssetResolver, LocalAsset};
use crate::cache::ResourceCache;
use crate::error::{Result, RewriteError};
use crate::rewrite::scripts::SignatureSet;
use html5ever::serialize::{SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::{namespace_url, ns};
use html5ever::{parse_document, Attribute, LocalName, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::collections::HashMap;
use url::Url;

/// Rendered HTML of one same-origin iframe, keyed by its position among the
/// document's `<iframe>` elements in DOM order.
#[derive(Debug, Clone)]
pub struct IframeFragment {
  pub index: usize,
  /// The iframe document's own URL, used as the base for its references.
  pub url: Option<String>,
  pub html: String,
}

/// One materialized asset, for the snapshot manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
  pub source_url: String,
  pub local_path: String,
  pub content_type: Option<String>,
}

/// Result of the rewrite phase: the complete local file tree plus the assets
/// it materialized.
#[derive(Debug)]
pub struct RewriteOutput {
  pub tree: SnapshotTree,
  pub assets: Vec<AssetRecord>,
}

/// Attributes that lazy-loading scripts park a real URL in. Promoted into the
/// live attribute so the static page loads them without the script.
const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original"];
const LAZY_BG_ATTRS: &[&str] = &["data-bg", "data-background"];

/// Classes that smooth-scroll libraries leave on `<html>`/`<body>` and that
/// lock scrolling when their runtime is gone.
const SCROLL_LOCK_CLASSES: &[&str] = &[
  "lenis",
  "lenis-smooth",
  "lenis-scrolling",
  "lenis-stopped",
  "has-scroll-smooth",
  "has-scroll-init",
  "locomotive-scroll",
  "overflow-hidden",
  "no-scroll",
  "scroll-lock",
];

/// Corrective styles injected into every snapshot. Neutralizes the
/// scroll-locking and reveal-on-scroll side effects of the removed runtime
/// scripts so the static page renders fully visible.
const CORRECTIVE_CSS: &str = "\
html, body {\n\
  overflow: auto !important;\n\
  overflow-x: hidden !important;\n\
  height: auto !important;\n\
  min-height: 100% !important;\n\
  scroll-behavior: auto !important;\n\
  opacity: 1 !important;\n\
  visibility: visible !important;\n\
}\n\
body, main, #__next, #__nuxt, #___gatsby, #app, .page, .content {\n\
  opacity: 1 !important;\n\
  visibility: visible !important;\n\
  transform: none !important;\n\
  overflow: visible !important;\n\
  height: auto !important;\n\
}\n\
.loader, .preloader, .loading, [class*=\"preloader\"] {\n\
  display: none !important;\n\
}\n\
[data-aos], [data-scroll], .opacity-0 {\n\
  opacity: 1 !important;\n\
  transform: none !important;\n\
  visibility: visible !important;\n\
}\n\
html.lenis, body.lenis, [data-lenis-prevent], [data-scroll-container] {\n\
  overflow: visible !important;\n\
  height: auto !important;\n\
}\n";

/// Rewrites a rendered document against a populated resource cache.
pub struct MarkupRewriter<'a> {
  cache: &'a ResourceCache,
  signatures: &'a SignatureSet,
}

impl<'a> MarkupRewriter<'a> {
  pub fn new(cache: &'a ResourceCache, signatures: &'a SignatureSet) -> Self {
    Self { cache, signatures }
  }

  /// Run the full rewrite: attribute resolution, stylesheet rewriting, script
  /// stripping, corrective-style injection, and iframe inlining.
  pub fn rewrite(
    &self,
    rendered_html: &str,
    base_url: &Url,
    fragments: &[IframeFragment],
  ) -> Result<RewriteOutput> {
    let mut pass = RewritePass {
      cache: self.cache,
      signatures: self.signatures,
      resolver: AssetResolver::new(),
      assets_by_url: HashMap::new(),
      materialized: Vec::new(),
      fragments,
      iframes_seen: 0,
    };

    let dom = parse_html(rendered_html);
    pass.walk(&dom.document, base_url);
    inject_corrective_style(&dom.document)?;

    let mut tree = SnapshotTree::new();
    tree.insert("index.html", serialize_dom(&dom)?);

    // Stylesheets may pull in further assets (and further stylesheets via
    // @import), so materialization runs to a fixpoint over the worklist.
    let mut records = Vec::new();
    let mut idx = 0;
    while idx < pass.materialized.len() {
      let url = pass.materialized[idx].clone();
      idx += 1;
      let asset = match pass.assets_by_url.get(&url) {
        Some(a) => a.clone(),
        None => continue,
      };
      let resource = match self.cache.get(&url) {
        Some(r) => r,
        None => continue,
      };

      let bytes = if asset.class == AssetClass::Style {
        let text = String::from_utf8_lossy(&resource.bytes).into_owned();
        let sheet_base = Url::parse(&url).map_err(|e| RewriteError::InvalidCss {
          url: url.clone(),
          message: e.to_string(),
        })?;
        let mut resolve = |raw: &str| {
          pass
            .local_for(raw, &sheet_base)
            .map(|a| css_relative(&a.path))
        };
        css::rewrite_css_urls(&text, &mut resolve).into_bytes()
      } else {
        resource.bytes.clone()
      };

      records.push(AssetRecord {
        source_url: url,
        local_path: asset.path.clone(),
        content_type: resource.content_type.clone(),
      });
      tree.insert(&asset.path, bytes);
    }

    Ok(RewriteOutput { tree, assets: records })
  }
}

/// Mutable state threaded through one rewrite.
struct RewritePass<'a> {
  cache: &'a ResourceCache,
  signatures: &'a SignatureSet,
  resolver: AssetResolver,
  assets_by_url: HashMap<String, LocalAsset>,
  materialized: Vec<String>,
  fragments: &'a [IframeFragment],
  iframes_seen: usize,
}

/// What to do with a child node after inspecting it.
enum Action {
  Keep,
  Remove,
  Replace(Handle),
}

impl<'a> RewritePass<'a> {
  /// Resolve a raw reference against the cache, materializing the asset.
  ///
  /// `None` means the reference has no local counterpart and must be dropped.
  fn local_for(&mut self, raw: &str, base: &Url) -> Option<LocalAsset> {
    let raw = raw.trim();
    if raw.is_empty()
      || raw.starts_with("data:")
      || raw.starts_with("blob:")
      || raw.starts_with('#')
      || raw.starts_with("javascript:")
    {
      return None;
    }

    let absolute = base.join(raw).ok()?;
    let resource = self.cache.get(absolute.as_str())?;
    let asset = self
      .resolver
      .resolve(&resource.url, resource.content_type.as_deref())?;
    if !self.assets_by_url.contains_key(&resource.url) {
      self.assets_by_url.insert(resource.url.clone(), asset.clone());
      self.materialized.push(resource.url.clone());
    }
    Some(asset)
  }

  fn walk(&mut self, node: &Handle, base: &Url) {
    let children: Vec<Handle> = node.children.borrow().clone();
    let mut kept: Vec<Handle> = Vec::with_capacity(children.len());

    for child in children {
      match self.inspect(&child, base) {
        Action::Keep => {
          self.walk(&child, base);
          kept.push(child);
        }
        Action::Remove => {}
        Action::Replace(replacement) => kept.push(replacement),
      }
    }

    *node.children.borrow_mut() = kept;
  }

  fn inspect(&mut self, node: &Handle, base: &Url) -> Action {
    let (name, attrs) = match &node.data {
      NodeData::Element { name, attrs, .. } => (name.local.as_ref().to_string(), attrs),
      _ => return Action::Keep,
    };

    match name.as_str() {
      // A surviving <base> would re-anchor every relative reference back at
      // the remote origin.
      "base" => Action::Remove,
      "script" => self.inspect_script(node, attrs, base),
      "link" => self.inspect_link(attrs, base),
      "iframe" => self.inspect_iframe(node, attrs),
      "style" => {
        self.rewrite_style_text(node, base);
        Action::Keep
      }
      _ => {
        self.rewrite_element_attrs(&name, attrs, base);
        Action::Keep
      }
    }
  }

  fn inspect_script(
    &mut self,
    node: &Handle,
    attrs: &RefCell<Vec<Attribute>>,
    base: &Url,
  ) -> Action {
    if let Some(src) = get_attr(attrs, "src") {
      if let Some(family) = self.signatures.match_src(&src) {
        tracing::debug!(src = %src, family, "stripping runtime script");
        return Action::Remove;
      }
      if src.starts_with("data:") {
        return Action::Keep;
      }
      // External script: rewrite to the captured copy or drop the element.
      // A script tag whose body was never captured is dead weight offline.
      return match self.local_for(&src, base) {
        Some(asset) => {
          set_attr(attrs, "src", &asset.path);
          drop_attrs(attrs, &["integrity", "crossorigin", "nonce"]);
          Action::Keep
        }
        None => Action::Remove,
      };
    }

    let source = text_content(node);
    if let Some(family) = self.signatures.match_inline(&source) {
      tracing::debug!(family, "stripping inline runtime script");
      return Action::Remove;
    }
    Action::Keep
  }

  fn inspect_link(&mut self, attrs: &RefCell<Vec<Attribute>>, base: &Url) -> Action {
    let rel = get_attr(attrs, "rel").unwrap_or_default().to_ascii_lowercase();
    let href = match get_attr(attrs, "href") {
      Some(h) => h,
      None => return Action::Keep,
    };

    let rel_has = |token: &str| rel.split_whitespace().any(|t| t == token);

    // Origin hints have no meaning offline.
    if rel_has("preconnect") || rel_has("dns-prefetch") {
      return Action::Remove;
    }

    if rel_has("preload") || rel_has("prefetch") || rel_has("modulepreload") {
      if self.signatures.match_src(&href).is_some() {
        return Action::Remove;
      }
      return match self.local_for(&href, base) {
        Some(asset) => {
          set_attr(attrs, "href", &asset.path);
          drop_attrs(attrs, &["integrity", "crossorigin", "nonce"]);
          Action::Keep
        }
        None => Action::Remove,
      };
    }

    let is_stylesheet = rel_has("stylesheet");
    let is_icon = rel_has("icon")
      || rel_has("apple-touch-icon")
      || rel_has("apple-touch-icon-precomposed")
      || rel_has("manifest");

    if !is_stylesheet && !is_icon {
      return Action::Keep;
    }
    if href.starts_with("data:") {
      return Action::Keep;
    }

    match self.local_for(&href, base) {
      Some(asset) => {
        set_attr(attrs, "href", &asset.path);
        drop_attrs(attrs, &["integrity", "crossorigin", "nonce"]);
        Action::Keep
      }
      None => Action::Remove,
    }
  }

  fn inspect_iframe(&mut self, _node: &Handle, attrs: &RefCell<Vec<Attribute>>) -> Action {
    // The position index counts every iframe so it stays aligned with the
    // capture session's DOM-order fragment keys.
    let index = self.iframes_seen;
    self.iframes_seen += 1;

    // srcdoc content is already inline at source; leave it alone.
    if get_attr(attrs, "srcdoc").is_some() {
      return Action::Keep;
    }

    let fragment = self.fragments.iter().find(|f| f.index == index).cloned();
    let replacement = match fragment {
      Some(frag) => {
        let frag_base = frag
          .url
          .as_deref()
          .and_then(|u| Url::parse(u).ok());
        self.inline_fragment(&frag, frag_base.as_ref(), index)
      }
      // Cross-origin or otherwise uncapturable: a live remote embed has no
      // place in the snapshot, so leave a marker where it was.
      None => new_element(
        "div",
        &[("data-snapshot-placeholder", "iframe")],
      ),
    };
    Action::Replace(replacement)
  }

  fn inline_fragment(
    &mut self,
    fragment: &IframeFragment,
    frag_base: Option<&Url>,
    index: usize,
  ) -> Handle {
    let dom = parse_html(&fragment.html);
    // The fragment goes through the same pipeline recursively. Its own nested
    // iframes were not captured separately, so they become placeholders.
    let outer_fragments = std::mem::replace(&mut self.fragments, &[]);
    let outer_count = std::mem::replace(&mut self.iframes_seen, 0);
    match frag_base {
      Some(base) => self.walk(&dom.document, base),
      None => {
        // No recorded document URL: relative references inside the fragment
        // cannot be resolved and fall out as dropped.
        if let Ok(base) = Url::parse("about:blank") {
          self.walk(&dom.document, &base);
        }
      }
    }
    self.fragments = outer_fragments;
    self.iframes_seen = outer_count;

    let wrapper = new_element("div", &[("data-snapshot-iframe", &index.to_string())]);
    if let Some(body) = find_element(&dom.document, "body") {
      let body_children: Vec<Handle> = body.children.borrow().clone();
      *wrapper.children.borrow_mut() = body_children;
    }
    wrapper
  }

  fn rewrite_style_text(&mut self, node: &Handle, base: &Url) {
    for child in node.children.borrow().iter() {
      if let NodeData::Text { contents } = &child.data {
        let text = contents.borrow().to_string();
        let mut resolve = |raw: &str| self.local_for(raw, base).map(|a| a.path);
        let rewritten = css::rewrite_css_urls(&text, &mut resolve);
        if rewritten != text {
          *contents.borrow_mut() = StrTendril::from(rewritten);
        }
      }
    }
  }

  fn rewrite_element_attrs(&mut self, name: &str, attrs: &RefCell<Vec<Attribute>>, base: &Url) {
    // Promote lazy-loading attributes before the live ones are inspected.
    if matches!(name, "img" | "source" | "video" | "audio" | "input") {
      for lazy in LAZY_SRC_ATTRS {
        if let Some(value) = get_attr(attrs, lazy) {
          if self.local_for(&value, base).is_some() {
            set_attr(attrs, "src", &value);
          }
          remove_attr(attrs, lazy);
        }
      }
      if let Some(value) = get_attr(attrs, "data-srcset") {
        set_attr(attrs, "srcset", &value);
        remove_attr(attrs, "data-srcset");
      }
    }

    if matches!(name, "img" | "source" | "video" | "audio" | "input") {
      self.rewrite_url_attr(attrs, "src", base);
      self.rewrite_srcset_attr(attrs, "srcset", base);
    }
    if name == "video" {
      self.rewrite_url_attr(attrs, "poster", base);
    }

    // Background-image URLs parked in data attributes by slider/gallery
    // scripts.
    for bg in LAZY_BG_ATTRS {
      if get_attr(attrs, bg).is_some() {
        self.rewrite_url_attr(attrs, bg, base);
      }
    }

    // Social-preview metadata keeps working offline when the image was
    // captured; otherwise the reference is dropped like any other asset.
    if name == "meta" {
      let key = get_attr(attrs, "property")
        .or_else(|| get_attr(attrs, "name"))
        .unwrap_or_default()
        .to_ascii_lowercase();
      if key.contains("image") {
        self.rewrite_url_attr(attrs, "content", base);
      }
    }

    if matches!(name, "html" | "body") {
      scrub_classes(attrs);
    }

    if let Some(style) = get_attr(attrs, "style") {
      let cleaned = strip_overflow_hidden(&style);
      if cleaned.contains("url(") {
        let mut resolve = |raw: &str| self.local_for(raw, base).map(|a| a.path);
        let rewritten = css::rewrite_css_urls(&cleaned, &mut resolve);
        set_attr(attrs, "style", &rewritten);
      } else if cleaned != style {
        if cleaned.trim().is_empty() {
          remove_attr(attrs, "style");
        } else {
          set_attr(attrs, "style", &cleaned);
        }
      }
    }
  }

  fn rewrite_url_attr(&mut self, attrs: &RefCell<Vec<Attribute>>, attr: &str, base: &Url) {
    let value = match get_attr(attrs, attr) {
      Some(v) => v,
      None => return,
    };
    if value.starts_with("data:") || value.starts_with('#') {
      return;
    }
    match self.local_for(&value, base) {
      Some(asset) => set_attr(attrs, attr, &asset.path),
      None => remove_attr(attrs, attr),
    }
  }

  fn rewrite_srcset_attr(&mut self, attrs: &RefCell<Vec<Attribute>>, attr: &str, base: &Url) {
    let value = match get_attr(attrs, attr) {
      Some(v) => v,
      None => return,
    };
    let rewritten =
      srcset::rewrite_srcset(&value, |raw| self.local_for(raw, base).map(|a| a.path));
    match rewritten {
      Some(list) => set_attr(attrs, attr, &list),
      None => remove_attr(attrs, attr),
    }
  }
}

/// Local path as referenced from inside a stylesheet.
///
/// All assets live one directory below `assets/`, and stylesheets are staged
/// in `assets/style/`, so sibling classes are reachable via `..`.
fn css_relative(path: &str) -> String {
  match path.strip_prefix("assets/") {
    Some(rest) => format!("../{rest}"),
    None => path.to_string(),
  }
}

fn parse_html(html: &str) -> RcDom {
  let opts = ParseOpts {
    tree_builder: TreeBuilderOpts {
      scripting_enabled: false,
      ..Default::default()
    },
    ..Default::default()
  };
  parse_document(RcDom::default(), opts).one(StrTendril::from(html))
}

fn serialize_dom(dom: &RcDom) -> Result<Vec<u8>> {
  let mut out = Vec::new();
  let document: SerializableHandle = dom.document.clone().into();
  html5ever::serialize(
    &mut out,
    &document,
    SerializeOpts {
      scripting_enabled: false,
      traversal_scope: TraversalScope::ChildrenOnly(None),
      create_missing_parent: false,
    },
  )
  .map_err(|e| RewriteError::InvalidHtml {
    message: format!("Failed to serialize document: {e}"),
  })?;
  Ok(out)
}

fn inject_corrective_style(document: &Handle) -> Result<()> {
  let head = find_element(document, "head").ok_or(RewriteError::MissingHead)?;
  let style = new_element("style", &[("data-snapshot-fix", "true")]);
  let text = Node::new(NodeData::Text {
    contents: RefCell::new(StrTendril::from(CORRECTIVE_CSS)),
  });
  style.children.borrow_mut().push(text);
  head.children.borrow_mut().push(style);
  Ok(())
}

fn find_element(node: &Handle, name: &str) -> Option<Handle> {
  if let NodeData::Element { name: qname, .. } = &node.data {
    if qname.local.as_ref() == name {
      return Some(node.clone());
    }
  }
  for child in node.children.borrow().iter() {
    if let Some(found) = find_element(child, name) {
      return Some(found);
    }
  }
  None
}

fn new_element(name: &str, attributes: &[(&str, &str)]) -> Handle {
  let attrs = attributes
    .iter()
    .map(|(k, v)| Attribute {
      name: QualName::new(None, ns!(), LocalName::from(*k)),
      value: StrTendril::from(*v),
    })
    .collect();
  Node::new(NodeData::Element {
    name: QualName::new(None, ns!(html), LocalName::from(name)),
    attrs: RefCell::new(attrs),
    template_contents: RefCell::new(None),
    mathml_annotation_xml_integration_point: false,
  })
}

fn get_attr(attrs: &RefCell<Vec<Attribute>>, name: &str) -> Option<String> {
  attrs
    .borrow()
    .iter()
    .find(|a| a.name.local.as_ref() == name)
    .map(|a| a.value.to_string())
}

fn set_attr(attrs: &RefCell<Vec<Attribute>>, name: &str, value: &str) {
  let mut attrs = attrs.borrow_mut();
  if let Some(attr) = attrs.iter_mut().find(|a| a.name.local.as_ref() == name) {
    attr.value = StrTendril::from(value);
  } else {
    attrs.push(Attribute {
      name: QualName::new(None, ns!(), LocalName::from(name)),
      value: StrTendril::from(value),
    });
  }
}

fn remove_attr(attrs: &RefCell<Vec<Attribute>>, name: &str) {
  attrs.borrow_mut().retain(|a| a.name.local.as_ref() != name);
}

fn drop_attrs(attrs: &RefCell<Vec<Attribute>>, names: &[&str]) {
  attrs
    .borrow_mut()
    .retain(|a| !names.contains(&a.name.local.as_ref()));
}

fn text_content(node: &Handle) -> String {
  let mut out = String::new();
  for child in node.children.borrow().iter() {
    if let NodeData::Text { contents } = &child.data {
      out.push_str(&contents.borrow());
    }
  }
  out
}

fn scrub_classes(attrs: &RefCell<Vec<Attribute>>) {
  let classes = match get_attr(attrs, "class") {
    Some(c) => c,
    None => return,
  };
  let kept: Vec<&str> = classes
    .split_whitespace()
    .filter(|c| {
      !SCROLL_LOCK_CLASSES
        .iter()
        .any(|blocked| c.eq_ignore_ascii_case(blocked))
    })
    .collect();
  if kept.is_empty() {
    remove_attr(attrs, "class");
  } else {
    set_attr(attrs, "class", &kept.join(" "));
  }
}

/// Remove `overflow: hidden` declarations from an inline style value.
fn strip_overflow_hidden(style: &str) -> String {
  style
    .split(';')
    .filter(|decl| {
      let mut parts = decl.splitn(2, ':');
      let prop = parts.next().unwrap_or("").trim();
      let value = parts.next().unwrap_or("");
      !(prop.eq_ignore_ascii_case("overflow") && value.to_ascii_lowercase().contains("hidden"))
    })
    .filter(|decl| !decl.trim().is_empty())
    .collect::<Vec<_>>()
    .join(";")
}
