use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::store::RelSign;
use crate::Error;

/// A set of tuples over the domains of a signature.
///
/// Tuples are only available while the relation is open. `zero` opens an
/// empty relation for filling, `load` opens it with its persisted content and
/// `close` releases the tuples again.
#[derive(Clone, Debug)]
pub struct Relation {
    name: String,
    sign: RelSign,
    tuples: BTreeSet<Vec<usize>>,
    open: bool,
}

impl Relation {
    pub fn new<S: Into<String>>(name: S, sign: RelSign) -> Relation {
        Relation {
            name: name.into(),
            sign,
            tuples: BTreeSet::new(),
            open: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sign(&self) -> &RelSign {
        &self.sign
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn file_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.tuples", self.name))
    }

    fn schema_mismatch<S: Into<String>>(&self, reason: S) -> Error {
        Error::SchemaMismatch {
            relation: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.open {
            Ok(())
        } else {
            Err(Error::NotReady(format!("relation {}", self.name)))
        }
    }

    /// Empties the relation, in memory and on disk, and opens it for filling.
    pub fn zero(&mut self, dir: &Path) -> Result<(), Error> {
        let path = self.file_path(dir);
        if path.exists() {
            fs::remove_file(path)?;
        }
        self.tuples.clear();
        self.open = true;
        Ok(())
    }

    /// Releases the in-memory tuples. Persisted content is kept.
    pub fn close(&mut self) {
        self.tuples.clear();
        self.open = false;
    }

    /// Adds a tuple, returning `true` if it was not present yet.
    pub fn add(&mut self, tuple: &[usize]) -> Result<bool, Error> {
        self.check_open()?;
        if tuple.len() != self.sign.arity() {
            return Err(self.schema_mismatch(format!(
                "tuple of arity {} added to relation of arity {}",
                tuple.len(),
                self.sign.arity()
            )));
        }
        Ok(self.tuples.insert(tuple.to_vec()))
    }

    pub fn contains(&self, tuple: &[usize]) -> Result<bool, Error> {
        self.check_open()?;
        Ok(self.tuples.contains(tuple))
    }

    pub fn size(&self) -> Result<usize, Error> {
        self.check_open()?;
        Ok(self.tuples.len())
    }

    /// Every tuple, in ascending order.
    pub fn iter(&self) -> Result<impl Iterator<Item = &[usize]>, Error> {
        self.check_open()?;
        Ok(self.tuples.iter().map(|t| t.as_slice()))
    }

    /// The distinct values of one column, lazily, in the order they first
    /// appear in the sorted tuples.
    pub fn iter_ary1(&self, column: usize) -> Result<impl Iterator<Item = usize> + '_, Error> {
        self.check_column(column)?;
        let mut seen = FxHashSet::default();
        Ok(self
            .iter()?
            .map(move |t| t[column])
            .filter(move |value| seen.insert(*value)))
    }

    /// The distinct pairs of values of two columns, lazily, in the order they
    /// first appear in the sorted tuples.
    pub fn iter_ary2(
        &self,
        column0: usize,
        column1: usize,
    ) -> Result<impl Iterator<Item = (usize, usize)> + '_, Error> {
        self.check_column(column0)?;
        self.check_column(column1)?;
        let mut seen = FxHashSet::default();
        Ok(self
            .iter()?
            .map(move |t| (t[column0], t[column1]))
            .filter(move |pair| seen.insert(*pair)))
    }

    /// The tuples whose `column` holds `value`.
    pub fn select(
        &self,
        column: usize,
        value: usize,
    ) -> Result<impl Iterator<Item = &[usize]>, Error> {
        self.check_column(column)?;
        Ok(self.iter()?.filter(move |t| t[column] == value))
    }

    fn check_column(&self, column: usize) -> Result<(), Error> {
        if column < self.sign.arity() {
            Ok(())
        } else {
            Err(self.schema_mismatch(format!(
                "column {} of relation with arity {}",
                column,
                self.sign.arity()
            )))
        }
    }

    /// Persists the tuples. `dom_sizes` holds the size of the domain of each
    /// column.
    pub fn save(&self, dir: &Path, dom_sizes: &[usize]) -> Result<(), Error> {
        self.check_open()?;
        fs::create_dir_all(dir)?;
        let mut out = BufWriter::new(fs::File::create(self.file_path(dir))?);
        let header: Vec<String> = self
            .sign
            .minor_doms()
            .iter()
            .zip(dom_sizes)
            .map(|(dom, size)| format!("{}:{}", dom, size))
            .collect();
        writeln!(out, "# {}", header.join(" "))?;
        writeln!(out, "# order={}", self.sign.order())?;
        for tuple in &self.tuples {
            let line: Vec<String> = tuple.iter().map(|c| c.to_string()).collect();
            writeln!(out, "{}", line.join(" "))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Opens the relation with its persisted tuples.
    ///
    /// The persisted columns must match the signature, and every component
    /// must index into the current domain of its column.
    pub fn load(&mut self, dir: &Path, dom_sizes: &[usize]) -> Result<(), Error> {
        let path = self.file_path(dir);
        if !path.exists() {
            return Err(Error::NotReady(format!("relation {}", self.name)));
        }
        let mut lines = BufReader::new(fs::File::open(path)?).lines();

        let header = lines.next().transpose()?.unwrap_or_default();
        let columns: Vec<&str> = header
            .strip_prefix('#')
            .ok_or_else(|| self.schema_mismatch("missing header"))?
            .split_whitespace()
            .map(|column| column.split(':').next().unwrap_or(column))
            .collect();
        if columns.len() != self.sign.arity() {
            return Err(self.schema_mismatch(format!(
                "persisted arity {} but declared {}",
                columns.len(),
                self.sign.arity()
            )));
        }
        for (persisted, declared) in columns.iter().zip(self.sign.minor_doms()) {
            if persisted != declared {
                return Err(self.schema_mismatch(format!(
                    "persisted column {} but declared {}",
                    persisted, declared
                )));
            }
        }

        let mut tuples = BTreeSet::new();
        for line in lines {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tuple = line
                .split_whitespace()
                .map(|c| c.parse::<usize>())
                .collect::<Result<Vec<usize>, _>>()?;
            if tuple.len() != self.sign.arity() {
                return Err(self.schema_mismatch(format!("malformed tuple `{}`", line)));
            }
            for (component, (&value, &size)) in tuple.iter().zip(dom_sizes).enumerate() {
                if value >= size {
                    return Err(self.schema_mismatch(format!(
                        "component {} of `{}` is outside domain {} of size {}",
                        component,
                        line,
                        self.sign.minor_doms()[component],
                        size
                    )));
                }
            }
            tuples.insert(tuple);
        }

        self.tuples = tuples;
        self.open = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(sign: &str) -> Relation {
        Relation::new("R", sign.parse().unwrap())
    }

    #[test]
    fn round_trip_each_arity() {
        let dir = tempfile::tempdir().unwrap();
        let signs = [
            ("M0:M0", vec![4]),
            ("M0,I0:M0_I0", vec![4, 3]),
            ("C0,I0,C1:C0xC1_I0", vec![5, 3, 5]),
            ("C0,I0,C1,M0:C0xC1_I0_M0", vec![5, 3, 5, 4]),
        ];
        for (sign, sizes) in signs.iter() {
            let mut rel = relation(sign);
            rel.zero(dir.path()).unwrap();
            let arity = sizes.len();
            let tuples: Vec<Vec<usize>> = vec![
                (0..arity).collect(),
                (0..arity).map(|i| sizes[i] - 1).collect(),
                vec![1; arity],
            ];
            for t in &tuples {
                rel.add(t).unwrap();
            }
            rel.save(dir.path(), sizes).unwrap();
            rel.close();
            assert!(rel.size().is_err());

            rel.load(dir.path(), sizes).unwrap();
            assert_eq!(rel.size().unwrap(), 3);
            for t in &tuples {
                assert!(rel.contains(t).unwrap());
            }
        }
    }

    #[test]
    fn add_wrong_arity() {
        let dir = tempfile::tempdir().unwrap();
        let mut rel = relation("M0,I0:M0_I0");
        rel.zero(dir.path()).unwrap();
        assert!(matches!(
            rel.add(&[1, 2, 3]),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(rel.add(&[1, 2]).unwrap());
        assert!(!rel.add(&[1, 2]).unwrap());
    }

    #[test]
    fn closed_relation_not_ready() {
        let mut rel = relation("M0:M0");
        assert!(matches!(rel.add(&[0]), Err(Error::NotReady(_))));
        assert!(matches!(rel.iter().map(|_| ()), Err(Error::NotReady(_))));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(rel.load(dir.path(), &[1]), Err(Error::NotReady(_))));
    }

    #[test]
    fn load_checks_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut rel = relation("M0,I0:M0_I0");
        rel.zero(dir.path()).unwrap();
        rel.add(&[3, 1]).unwrap();
        rel.save(dir.path(), &[4, 2]).unwrap();

        let mut renamed = Relation::new("R", "M0,H0:M0_H0".parse().unwrap());
        assert!(matches!(
            renamed.load(dir.path(), &[4, 2]),
            Err(Error::SchemaMismatch { .. })
        ));

        let mut wider = Relation::new("R", "M0,I0,V0:M0_I0_V0".parse().unwrap());
        assert!(matches!(
            wider.load(dir.path(), &[4, 2, 2]),
            Err(Error::SchemaMismatch { .. })
        ));

        // The M domain shrank below the persisted component.
        assert!(matches!(
            rel.load(dir.path(), &[3, 2]),
            Err(Error::SchemaMismatch { .. })
        ));
        rel.load(dir.path(), &[4, 2]).unwrap();
    }

    #[test]
    fn projections_and_select() {
        let dir = tempfile::tempdir().unwrap();
        let mut rel = relation("C0,I0,C1:C0xC1_I0");
        rel.zero(dir.path()).unwrap();
        rel.add(&[0, 1, 2]).unwrap();
        rel.add(&[0, 2, 2]).unwrap();
        rel.add(&[1, 1, 0]).unwrap();

        assert_eq!(rel.iter_ary1(0).unwrap().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(rel.iter_ary1(2).unwrap().collect::<Vec<_>>(), vec![2, 0]);
        assert_eq!(
            rel.iter_ary2(2, 1).unwrap().collect::<Vec<_>>(),
            vec![(2, 1), (2, 2), (0, 1)]
        );
        // Projections stream over the tuples.
        let mut firsts = rel.iter_ary1(1).unwrap();
        assert_eq!(firsts.next(), Some(1));
        assert_eq!(firsts.next(), Some(2));
        let selected: Vec<&[usize]> = rel.select(1, 1).unwrap().collect();
        assert_eq!(selected, vec![&[0, 1, 2][..], &[1, 1, 0][..]]);
        assert!(rel.iter_ary1(3).is_err());
    }

    #[test]
    fn zero_removes_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut rel = relation("M0:M0");
        rel.zero(dir.path()).unwrap();
        rel.add(&[0]).unwrap();
        rel.save(dir.path(), &[1]).unwrap();
        assert!(rel.file_path(dir.path()).exists());
        rel.zero(dir.path()).unwrap();
        assert!(!rel.file_path(dir.path()).exists());
        assert_eq!(rel.size().unwrap(), 0);
    }
}
