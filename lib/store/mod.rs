//! Domains, relations and the store holding them.
//!
//! The `Store` owns every domain and relation of a project under a single
//! work directory, which is also where the external solver reads and writes
//! relation files.

use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::program::Program;
use crate::Error;

mod domain;
mod relation;
mod sign;

pub use self::domain::{persisted_size, AnyDomain, Domain, Element};
pub use self::relation::Relation;
pub use self::sign::{major_name, RelSign};

pub struct Store {
    work_dir: PathBuf,
    domains: FxHashMap<String, Box<dyn AnyDomain>>,
    relations: FxHashMap<String, Relation>,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(work_dir: P) -> Store {
        Store {
            work_dir: work_dir.into(),
            domains: FxHashMap::default(),
            relations: FxHashMap::default(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Publishes a computed domain, replacing any previous version.
    pub fn insert_domain<T: Element>(&mut self, mut domain: Domain<T>) {
        domain.set_filled();
        self.domains.insert(domain.name().to_string(), Box::new(domain));
    }

    pub fn has_domain(&self, name: &str) -> bool {
        self.domains.contains_key(name)
    }

    pub fn domain<T: Element>(&self, name: &str) -> Result<&Domain<T>, Error> {
        self.domains
            .get(name)
            .ok_or_else(|| Error::NotReady(format!("domain {}", name)))?
            .as_any()
            .downcast_ref::<Domain<T>>()
            .ok_or_else(|| format!("domain {} holds a different element type", name).into())
    }

    pub fn domain_mut<T: Element>(&mut self, name: &str) -> Result<&mut Domain<T>, Error> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| Error::NotReady(format!("domain {}", name)))?
            .as_any_mut()
            .downcast_mut::<Domain<T>>()
            .ok_or_else(|| format!("domain {} holds a different element type", name).into())
    }

    pub fn domain_size(&self, name: &str) -> Result<usize, Error> {
        self.domains
            .get(name)
            .map(|domain| domain.size())
            .ok_or_else(|| Error::NotReady(format!("domain {}", name)))
    }

    pub fn save_domain(&self, name: &str) -> Result<(), Error> {
        self.domains
            .get(name)
            .ok_or_else(|| Error::NotReady(format!("domain {}", name)))?
            .save(&self.work_dir)
    }

    /// Reads a domain persisted in the work directory into the store.
    pub fn load_domain<T: Element>(&mut self, name: &str) -> Result<&Domain<T>, Error> {
        let mut domain: Domain<T> = Domain::new(name);
        domain.load(&self.work_dir)?;
        self.insert_domain(domain);
        self.domain(name)
    }

    /// Writes the XML description of a domain into `dir`.
    pub fn save_domain_xml(&self, name: &str, dir: &Path, program: &Program) -> Result<(), Error> {
        self.domains
            .get(name)
            .ok_or_else(|| Error::NotReady(format!("domain {}", name)))?
            .save_xml(dir, program)
    }

    /// Declares a relation. Declaring it again is allowed as long as the
    /// columns agree; the physical order may differ between declarations.
    pub fn declare_relation(&mut self, name: &str, sign: RelSign) -> Result<(), Error> {
        match self.relations.get(name) {
            Some(existing) if existing.sign().minor_doms() != sign.minor_doms() => {
                Err(Error::SchemaMismatch {
                    relation: name.to_string(),
                    reason: format!("declared as {} and as {}", existing.sign(), sign),
                })
            }
            Some(_) => Ok(()),
            None => {
                self.relations
                    .insert(name.to_string(), Relation::new(name, sign));
                Ok(())
            }
        }
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relation(&self, name: &str) -> Result<&Relation, Error> {
        self.relations
            .get(name)
            .ok_or_else(|| Error::NotReady(format!("relation {}", name)))
    }

    pub fn relation_mut(&mut self, name: &str) -> Result<&mut Relation, Error> {
        self.relations
            .get_mut(name)
            .ok_or_else(|| Error::NotReady(format!("relation {}", name)))
    }

    /// Sizes of the domains of a signature, taken from the `.dom` header
    /// of domains that are persisted but not loaded.
    fn dom_sizes(&self, sign: &RelSign) -> Result<Vec<usize>, Error> {
        sign.major_doms()
            .into_iter()
            .map(|dom| match self.domains.get(dom) {
                Some(domain) => Ok(domain.size()),
                None => persisted_size(&self.work_dir, dom)?
                    .ok_or_else(|| Error::NotReady(format!("domain {}", dom))),
            })
            .collect()
    }

    /// Clears a relation, including its persisted tuples, and opens it for
    /// filling.
    pub fn zero_relation(&mut self, name: &str) -> Result<&mut Relation, Error> {
        let work_dir = self.work_dir.clone();
        let relation = self.relation_mut(name)?;
        relation.zero(&work_dir)?;
        Ok(relation)
    }

    pub fn save_relation(&self, name: &str) -> Result<(), Error> {
        let relation = self.relation(name)?;
        let sizes = self.dom_sizes(relation.sign())?;
        relation.save(&self.work_dir, &sizes)
    }

    /// Opens a relation with its persisted tuples.
    pub fn load_relation(&mut self, name: &str) -> Result<&Relation, Error> {
        let sizes = self.dom_sizes(self.relation(name)?.sign())?;
        let work_dir = self.work_dir.clone();
        let relation = self.relation_mut(name)?;
        relation.load(&work_dir, &sizes)?;
        Ok(relation)
    }

    pub fn close_relation(&mut self, name: &str) -> Result<(), Error> {
        self.relation_mut(name)?.close();
        Ok(())
    }

    /// Whether the relation has tuples persisted in the work directory.
    pub fn is_persisted(&self, name: &str) -> bool {
        self.relations
            .get(name)
            .map(|relation| relation.file_path(&self.work_dir).exists())
            .unwrap_or(false)
    }

    /// Writes the tuples of an open relation with every component rendered
    /// through its domain.
    pub fn print_relation<W: Write>(&self, name: &str, out: &mut W) -> Result<(), Error> {
        let relation = self.relation(name)?;
        let doms: Vec<&dyn AnyDomain> = relation
            .sign()
            .major_doms()
            .into_iter()
            .map(|dom| {
                self.domains
                    .get(dom)
                    .map(|d| &**d)
                    .ok_or_else(|| Error::NotReady(format!("domain {}", dom)))
            })
            .collect::<Result<_, Error>>()?;

        writeln!(out, "{} ({})", name, relation.sign())?;
        for tuple in relation.iter()? {
            let rendered = tuple
                .iter()
                .zip(&doms)
                .map(|(&index, dom)| -> Result<String, Error> {
                    Ok(format!("{}{}={}", dom.name(), index, dom.render(index)?))
                })
                .collect::<Result<Vec<String>, Error>>()?;
            writeln!(out, "  {}", rendered.join(" "))?;
        }
        Ok(())
    }
}
