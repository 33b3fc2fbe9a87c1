//! Template rendering of configuration artifacts.

use std::path::PathBuf;

use log::error;
use minijinja::{path_loader, Environment, ErrorKind, UndefinedBehavior};

use crate::error::RenderError;
use crate::types::RenderContext;

/// Turns a template name and a context into artifact content.
pub trait Render {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError>;
}

/// Jinja templates loaded from a directory.
///
/// Nothing is cached: each call builds a fresh environment and re-reads the
/// template from disk.
#[derive(Debug, Clone)]
pub struct TemplateDir {
    dir: PathBuf,
}

impl TemplateDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Render for TemplateDir {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_loader(path_loader(self.dir.clone()));

        let syntax_or_data = |source| RenderError::TemplateSyntaxOrDataError {
            name: template.to_string(),
            source,
        };

        let loaded = match env.get_template(template) {
            Ok(loaded) => loaded,
            Err(e) if e.kind() == ErrorKind::TemplateNotFound => {
                error!(
                    "Could not load template {} from {}",
                    template,
                    self.dir.display()
                );
                return Err(RenderError::TemplateNotFound {
                    name: template.to_string(),
                    search_dir: self.dir.clone(),
                });
            }
            Err(e) => return Err(syntax_or_data(e)),
        };
        loaded.render(context).map_err(syntax_or_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitConfig;
    use crate::types::PeerRecord;
    use std::fs;

    fn context(peers: Vec<PeerRecord>) -> RenderContext {
        RenderContext::new(&UnitConfig::default(), peers)
    }

    fn peer(context: &str) -> PeerRecord {
        PeerRecord {
            id: PeerRecord::derive_id(context),
            url: format!("http://{}/thruk", context),
            nagios_context: context.to_string(),
            thruk_key: "k".into(),
            extra: Default::default(),
        }
    }

    #[test]
    fn renders_peers_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("peers.j2"),
            "{{ site_name }}:{% for p in peers %} {{ p.nagios_context }}={{ p.id }}{% endfor %}\n",
        )
        .unwrap();

        let out = TemplateDir::new(dir.path())
            .render("peers.j2", &context(vec![peer("c")]))
            .unwrap();
        assert_eq!(out, format!("thruk: c={}\n", PeerRecord::derive_id("c")));
    }

    #[test]
    fn missing_template_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateDir::new(dir.path())
            .render("absent.j2", &context(vec![]))
            .unwrap_err();
        match err {
            RenderError::TemplateNotFound { name, search_dir } => {
                assert_eq!(name, "absent.j2");
                assert_eq!(search_dir, dir.path());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn undefined_variable_and_bad_syntax_are_render_faults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("undefined.j2"), "{{ nope }}").unwrap();
        fs::write(dir.path().join("broken.j2"), "{% for %}").unwrap();
        let templates = TemplateDir::new(dir.path());

        for name in ["undefined.j2", "broken.j2"] {
            assert!(matches!(
                templates.render(name, &context(vec![])),
                Err(RenderError::TemplateSyntaxOrDataError { .. })
            ));
        }
    }

    #[test]
    fn edits_on_disk_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.j2");
        let templates = TemplateDir::new(dir.path());

        fs::write(&path, "one").unwrap();
        assert_eq!(templates.render("t.j2", &context(vec![])).unwrap(), "one");
        fs::write(&path, "two").unwrap();
        assert_eq!(templates.render("t.j2", &context(vec![])).unwrap(), "two");
    }

    #[test]
    fn shipped_template_lists_every_peer() {
        let templates = TemplateDir::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));
        let out = templates
            .render("thruk_local.conf.j2", &context(vec![peer("dc1"), peer("dc2")]))
            .unwrap();
        assert!(out.contains("peer = http://dc1/thruk"));
        assert!(out.contains(&format!("id   = {}", PeerRecord::derive_id("dc2"))));
        assert_eq!(out.matches("<peer>").count(), 2);
    }
}
