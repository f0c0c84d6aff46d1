use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::fs;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::program::{FieldId, InstId, MethodId, Program, TypeId, VarId};
use crate::Error;

/// Something that can be numbered by a `Domain`.
///
/// Elements are persisted one per line, so `encode` must not produce line
/// breaks.
pub trait Element: Clone + Eq + Hash + fmt::Debug + 'static {
    fn encode(&self) -> String;
    fn decode(s: &str) -> Result<Self, Error>;
    /// Extra attributes for the XML dump of a domain.
    fn xml_attrs(&self, _program: &Program) -> String {
        String::new()
    }
}

macro_rules! handle_element {
    ($handle:ident) => {
        impl Element for $handle {
            fn encode(&self) -> String {
                self.0.to_string()
            }

            fn decode(s: &str) -> Result<$handle, Error> {
                Ok($handle(s.trim().parse()?))
            }
        }
    };
}

handle_element!(VarId);
handle_element!(TypeId);

impl Element for MethodId {
    fn encode(&self) -> String {
        self.0.to_string()
    }

    fn decode(s: &str) -> Result<MethodId, Error> {
        Ok(MethodId(s.trim().parse()?))
    }

    fn xml_attrs(&self, program: &Program) -> String {
        program.method_xml_attrs(*self)
    }
}

impl Element for InstId {
    fn encode(&self) -> String {
        self.0.to_string()
    }

    fn decode(s: &str) -> Result<InstId, Error> {
        Ok(InstId(s.trim().parse()?))
    }

    fn xml_attrs(&self, program: &Program) -> String {
        program.instruction_xml_attrs(*self)
    }
}

/// Fields, where `None` stands for the elements of an array.
impl Element for Option<FieldId> {
    fn encode(&self) -> String {
        match self {
            Some(field) => field.0.to_string(),
            None => "-".to_string(),
        }
    }

    fn decode(s: &str) -> Result<Option<FieldId>, Error> {
        match s.trim() {
            "-" => Ok(None),
            s => Ok(Some(FieldId(s.parse()?))),
        }
    }
}

impl Element for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(s: &str) -> Result<String, Error> {
        Ok(s.to_string())
    }
}

/// A dense numbering of entities.
///
/// Indices are assigned in insertion order and never change until the
/// domain is cleared.
#[derive(Clone, Debug)]
pub struct Domain<T: Element> {
    name: String,
    elements: Vec<T>,
    indices: FxHashMap<T, usize>,
    filled: bool,
}

impl<T: Element> Domain<T> {
    pub fn new<S: Into<String>>(name: S) -> Domain<T> {
        Domain {
            name: name.into(),
            elements: Vec::new(),
            indices: FxHashMap::default(),
            filled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of `element`, adding it if it is not in the domain
    /// yet.
    pub fn get_or_add(&mut self, element: T) -> usize {
        self.filled = true;
        if let Some(&index) = self.indices.get(&element) {
            return index;
        }
        let index = self.elements.len();
        self.indices.insert(element.clone(), index);
        self.elements.push(element);
        index
    }

    /// Returns the index of `element`, or `None` if it is not in the domain.
    pub fn index_of(&self, element: &T) -> Result<Option<usize>, Error> {
        self.check_filled()?;
        Ok(self.indices.get(element).cloned())
    }

    pub fn get(&self, index: usize) -> Result<&T, Error> {
        self.check_filled()?;
        self.elements
            .get(index)
            .ok_or_else(|| Error::DomainIndexOutOfBounds {
                domain: self.name.clone(),
                index,
            })
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Marks the domain as computed, even if it has no elements.
    pub fn set_filled(&mut self) {
        self.filled = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.elements.iter().enumerate()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.indices.clear();
        self.filled = false;
    }

    fn check_filled(&self) -> Result<(), Error> {
        if self.filled {
            Ok(())
        } else {
            Err(Error::NotReady(format!("domain {}", self.name)))
        }
    }

    /// Writes `<name>.map` and `<name>.dom` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), Error> {
        fs::create_dir_all(dir)?;
        let map_name = format!("{}.map", self.name);
        let mut out = BufWriter::new(fs::File::create(dir.join(&map_name))?);
        for element in &self.elements {
            writeln!(out, "{}", element.encode())?;
        }
        out.flush()?;
        fs::write(
            dir.join(format!("{}.dom", self.name)),
            format!("{} {} {}\n", self.name, self.size(), map_name),
        )?;
        Ok(())
    }

    /// Reads back a domain written by `save`.
    pub fn load(&mut self, dir: &Path) -> Result<(), Error> {
        let path = dir.join(format!("{}.map", self.name));
        if !path.exists() {
            return Err(Error::NotReady(format!("domain {}", self.name)));
        }
        self.clear();
        for line in BufReader::new(fs::File::open(path)?).lines() {
            let element = T::decode(&line?)?;
            let index = self.elements.len();
            if self.get_or_add(element) != index {
                return Err(format!("domain {} has a repeated element", self.name).into());
            }
        }
        self.filled = true;
        Ok(())
    }

    /// Writes `<name>.xml`, describing each element for reports.
    pub fn save_xml(&self, dir: &Path, program: &Program) -> Result<(), Error> {
        fs::create_dir_all(dir)?;
        let mut out = BufWriter::new(fs::File::create(dir.join(format!("{}.xml", self.name)))?);
        writeln!(out, "<{}list>", self.name)?;
        for (index, element) in self.iter() {
            let attrs = element.xml_attrs(program);
            if attrs.is_empty() {
                writeln!(out, "<{} id=\"{}{}\"/>", self.name, self.name, index)?;
            } else {
                writeln!(
                    out,
                    "<{} id=\"{}{}\" {}/>",
                    self.name, self.name, index, attrs
                )?;
            }
        }
        writeln!(out, "</{}list>", self.name)?;
        out.flush()?;
        Ok(())
    }
}

/// The size recorded in the `<name>.dom` header in `dir`, if the domain
/// was saved there.
pub fn persisted_size(dir: &Path, name: &str) -> Result<Option<usize>, Error> {
    let path = dir.join(format!("{}.dom", name));
    if !path.exists() {
        return Ok(None);
    }
    let header = fs::read_to_string(path)?;
    let mut fields = header.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(dom), Some(size)) if dom == name => Ok(Some(size.parse()?)),
        _ => Err(format!("malformed header in {}.dom", name).into()),
    }
}

/// A domain with its element type erased, as kept in the `Store`.
pub trait AnyDomain: Any {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn is_filled(&self) -> bool;
    fn set_filled(&mut self);
    fn save(&self, dir: &Path) -> Result<(), Error>;
    fn save_xml(&self, dir: &Path, program: &Program) -> Result<(), Error>;
    /// The element at `index`, as it is written to the domain's map file.
    fn render(&self, index: usize) -> Result<String, Error>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Element> AnyDomain for Domain<T> {
    fn name(&self) -> &str {
        Domain::name(self)
    }

    fn size(&self) -> usize {
        Domain::size(self)
    }

    fn is_filled(&self) -> bool {
        Domain::is_filled(self)
    }

    fn set_filled(&mut self) {
        Domain::set_filled(self)
    }

    fn save(&self, dir: &Path) -> Result<(), Error> {
        Domain::save(self, dir)
    }

    fn save_xml(&self, dir: &Path, program: &Program) -> Result<(), Error> {
        Domain::save_xml(self, dir, program)
    }

    fn render(&self, index: usize) -> Result<String, Error> {
        self.get(index).map(|element| element.encode())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
