//! Property-level tests for the rewrite phase: idempotence, path uniqueness,
//! and the no-dangling-reference invariant.

use sitesnap::cache::ResourceCache;
use sitesnap::rewrite::scripts::SignatureSet;
use sitesnap::rewrite::MarkupRewriter;
use url::Url;

fn populated_cache() -> ResourceCache {
  let mut cache = ResourceCache::new();
  cache.put(
    "https://example.test/css/main.css",
    b"@import url(extra.css);\nbody { background: url(../img/bg.png); }".to_vec(),
    Some("text/css".to_string()),
  );
  cache.put(
    "https://example.test/css/extra.css",
    b"h1 { background: url(../img/hero.png); }".to_vec(),
    Some("text/css".to_string()),
  );
  cache.put(
    "https://example.test/img/bg.png",
    vec![1, 2, 3],
    Some("image/png".to_string()),
  );
  cache.put(
    "https://example.test/img/hero.png",
    vec![4, 5, 6],
    Some("image/png".to_string()),
  );
  // Two distinct URLs with the same filename must get distinct local paths.
  cache.put(
    "https://cdn-a.example.test/logo.png",
    vec![7],
    Some("image/png".to_string()),
  );
  cache.put(
    "https://cdn-b.example.test/logo.png",
    vec![8],
    Some("image/png".to_string()),
  );
  cache
}

const PAGE: &str = r#"<!DOCTYPE html>
<html><head><link rel="stylesheet" href="/css/main.css"></head>
<body>
<img src="https://cdn-a.example.test/logo.png">
<img src="https://cdn-b.example.test/logo.png">
<img data-src="/img/hero.png">
<img srcset="/img/bg.png 1x, /img/hero.png 2x">
</body></html>"#;

fn rewrite_once(cache: &ResourceCache) -> sitesnap::rewrite::RewriteOutput {
  let signatures = SignatureSet::builtin();
  let rewriter = MarkupRewriter::new(cache, &signatures);
  let base = Url::parse("https://example.test/").unwrap();
  rewriter.rewrite(PAGE, &base, &[]).unwrap()
}

#[test]
fn rewriting_twice_is_byte_identical() {
  let cache = populated_cache();
  let first = rewrite_once(&cache);
  let second = rewrite_once(&cache);

  let first_files: Vec<(&str, &[u8])> = first.tree.iter().collect();
  let second_files: Vec<(&str, &[u8])> = second.tree.iter().collect();
  assert_eq!(first_files, second_files);
  assert_eq!(first.assets, second.assets);
}

#[test]
fn colliding_filenames_get_distinct_local_paths() {
  let cache = populated_cache();
  let output = rewrite_once(&cache);

  let logo_paths: Vec<&str> = output
    .assets
    .iter()
    .filter(|a| a.source_url.contains("logo.png"))
    .map(|a| a.local_path.as_str())
    .collect();
  assert_eq!(logo_paths.len(), 2);
  assert_ne!(logo_paths[0], logo_paths[1]);
}

#[test]
fn every_rewritten_reference_resolves_inside_the_tree() {
  let cache = populated_cache();
  let output = rewrite_once(&cache);
  let index = String::from_utf8(output.tree.get("index.html").unwrap().to_vec()).unwrap();

  // Collect every assets/ path mentioned in the document and require each to
  // be a packaged file.
  let mut rest = index.as_str();
  while let Some(pos) = rest.find("assets/") {
    let tail = &rest[pos..];
    let end = tail
      .find(|c: char| c == '"' || c == '\'' || c == ' ' || c == ',')
      .unwrap_or(tail.len());
    let path = &tail[..end];
    assert!(output.tree.contains(path), "dangling reference {path}");
    rest = &tail[end..];
  }

  // No reference to the origin remains for any resource class.
  assert!(!index.contains("cdn-a.example.test"));
  assert!(!index.contains("/css/main.css"));
  assert!(!index.contains("data-src"), "lazy attribute must be promoted");
}

#[test]
fn stylesheet_chain_is_materialized_recursively() {
  let cache = populated_cache();
  let output = rewrite_once(&cache);

  let css_files: Vec<&str> = output
    .assets
    .iter()
    .filter(|a| a.local_path.starts_with("assets/style/"))
    .map(|a| a.source_url.as_str())
    .collect();
  assert!(css_files.contains(&"https://example.test/css/main.css"));
  assert!(
    css_files.contains(&"https://example.test/css/extra.css"),
    "@import target must be pulled in via the worklist"
  );

  let main_path = output
    .assets
    .iter()
    .find(|a| a.source_url.ends_with("main.css"))
    .map(|a| a.local_path.clone())
    .unwrap();
  let main_css = String::from_utf8(output.tree.get(&main_path).unwrap().to_vec()).unwrap();
  assert!(main_css.contains("@import url(\"../style/"), "{main_css}");
  assert!(main_css.contains("url(\"../img/"), "{main_css}");
}

#[test]
fn unmatched_scripts_survive_matched_ones_do_not() {
  let mut cache = populated_cache();
  cache.put(
    "https://example.test/js/carousel.js",
    b"initCarousel();".to_vec(),
    Some("application/javascript".to_string()),
  );
  cache.put(
    "https://example.test/_nuxt/entry.js",
    b"window.__NUXT__={};".to_vec(),
    Some("application/javascript".to_string()),
  );

  let html = r#"<!DOCTYPE html>
<html><head></head><body>
<script src="/js/carousel.js"></script>
<script src="/_nuxt/entry.js"></script>
</body></html>"#;

  let signatures = SignatureSet::builtin();
  let rewriter = MarkupRewriter::new(&cache, &signatures);
  let base = Url::parse("https://example.test/").unwrap();
  let output = rewriter.rewrite(html, &base, &[]).unwrap();
  let index = String::from_utf8(output.tree.get("index.html").unwrap().to_vec()).unwrap();

  assert!(index.contains("src=\"assets/script/"), "{index}");
  assert!(!index.contains("_nuxt"), "{index}");
  let script_assets: Vec<_> = output
    .assets
    .iter()
    .filter(|a| a.local_path.starts_with("assets/script/"))
    .collect();
  assert_eq!(script_assets.len(), 1);
  assert!(script_assets[0].source_url.ends_with("carousel.js"));
}
