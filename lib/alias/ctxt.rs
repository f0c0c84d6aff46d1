use serde::{Deserialize, Serialize};
use std::fmt;

use crate::program::{xml_escape, InstId, Program};
use crate::store::Element;
use crate::Error;

/// An abstract context: a sequence of call or allocation sites, most
/// significant first.
///
/// The empty sequence is the epsilon context, the only context of methods
/// analysed insensitively. Two contexts are equal when they hold the same
/// sites in the same order.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Ctxt(Box<[InstId]>);

impl Ctxt {
    pub fn epsilon() -> Ctxt {
        Ctxt::default()
    }

    pub fn new(elems: Vec<InstId>) -> Ctxt {
        Ctxt(elems.into_boxed_slice())
    }

    pub fn elems(&self) -> &[InstId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_epsilon(&self) -> bool {
        self.is_empty()
    }

    pub fn contains(&self, site: InstId) -> bool {
        self.0.contains(&site)
    }

    /// Prepends `site`, keeping at most `k` sites. With `k == 0` the result
    /// is epsilon.
    pub fn append(&self, k: usize, site: InstId) -> Ctxt {
        if k == 0 {
            return Ctxt::epsilon();
        }
        let len = (k - 1).min(self.len()) + 1;
        let mut elems = Vec::with_capacity(len);
        elems.push(site);
        elems.extend_from_slice(&self.0[..len - 1]);
        Ctxt::new(elems)
    }

    /// The `k` most significant sites.
    pub fn truncate(&self, k: usize) -> Ctxt {
        if k >= self.len() {
            self.clone()
        } else {
            Ctxt::new(self.0[..k].to_vec())
        }
    }
}

impl fmt::Display for Ctxt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let elems: Vec<String> = self.0.iter().map(|site| site.to_string()).collect();
        write!(f, "[{}]", elems.join(","))
    }
}

impl Element for Ctxt {
    fn encode(&self) -> String {
        let elems: Vec<String> = self.0.iter().map(|site| site.0.to_string()).collect();
        elems.join(" ")
    }

    fn decode(s: &str) -> Result<Ctxt, Error> {
        let elems = s
            .split_whitespace()
            .map(|site| site.parse().map(InstId).map_err(Error::from))
            .collect::<Result<Vec<InstId>, Error>>()?;
        Ok(Ctxt::new(elems))
    }

    fn xml_attrs(&self, program: &Program) -> String {
        let sites: Vec<String> = self
            .0
            .iter()
            .map(|site| program.describe_instruction(*site))
            .collect();
        format!("sites=\"{}\"", xml_escape(&sites.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctxt(sites: &[usize]) -> Ctxt {
        Ctxt::new(sites.iter().map(|&s| InstId(s)).collect())
    }

    #[test]
    fn append_keeps_k_sites() {
        let c = ctxt(&[3, 5]);
        assert_eq!(c.append(1, InstId(7)), ctxt(&[7]));
        assert_eq!(c.append(2, InstId(7)), ctxt(&[7, 3]));
        assert_eq!(c.append(3, InstId(7)), ctxt(&[7, 3, 5]));
        assert_eq!(c.append(9, InstId(7)), ctxt(&[7, 3, 5]));
        assert_eq!(c.append(0, InstId(7)), Ctxt::epsilon());
        assert_eq!(Ctxt::epsilon().append(2, InstId(1)), ctxt(&[1]));
    }

    #[test]
    fn truncate_and_contains() {
        let c = ctxt(&[4, 2, 9]);
        assert_eq!(c.truncate(2), ctxt(&[4, 2]));
        assert_eq!(c.truncate(5), c);
        assert!(c.truncate(0).is_epsilon());
        assert!(c.contains(InstId(9)));
        assert!(!c.truncate(2).contains(InstId(9)));
    }

    #[test]
    fn identity_of_sites() {
        // Sites printing alike are still different sites.
        let mut program = crate::program::tests::sample_program();
        program.instructions[5].line = program.instructions[0].line;
        program.instructions[5].method = program.instructions[0].method;
        assert_eq!(
            program.describe_instruction(InstId(0)),
            program.describe_instruction(InstId(5))
        );
        assert_ne!(ctxt(&[0]), ctxt(&[5]));
        assert_eq!(ctxt(&[0, 5]), ctxt(&[0, 5]));
        assert_ne!(ctxt(&[0, 5]), ctxt(&[5, 0]));
    }

    #[test]
    fn display_and_encoding() {
        let c = ctxt(&[3, 5]);
        assert_eq!(c.to_string(), "[i3,i5]");
        assert_eq!(Ctxt::epsilon().to_string(), "[]");
        assert_eq!(c.encode(), "3 5");
        assert_eq!(Ctxt::decode("3 5").unwrap(), c);
        assert_eq!(Ctxt::decode("").unwrap(), Ctxt::epsilon());
        assert!(Ctxt::decode("3 x").is_err());
    }
}
