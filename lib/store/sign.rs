use std::fmt;
use std::str::FromStr;

use crate::Error;

/// The signature of a relation.
///
/// A signature lists the relation's columns as *minor* domain names, a major
/// domain name followed by a numeric suffix (`C0`, `C1`, `I0`), and the
/// physical variable order the solver encodes them in. The textual form is
/// `A0,C0,M0:A0_M0_C0`; in the order, `_` separates independent variables and
/// `x` interleaves them.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RelSign {
    doms: Vec<String>,
    order: String,
}

/// Trims the numeric suffix off a minor domain name.
pub fn major_name(minor: &str) -> &str {
    minor.trim_end_matches(|c: char| c.is_ascii_digit())
}

fn order_names(order: &str) -> impl Iterator<Item = &str> {
    order
        .split('_')
        .flat_map(|group| group.split('x'))
        .filter(|name| !name.is_empty())
}

impl RelSign {
    pub fn new<S: AsRef<str>>(doms: &[S], order: &str) -> Result<RelSign, Error> {
        let doms: Vec<String> = doms.iter().map(|d| d.as_ref().to_string()).collect();
        for (i, dom) in doms.iter().enumerate() {
            let major = major_name(dom);
            if major.is_empty() || major.len() == dom.len() {
                return Err(format!("bad minor domain name {} in signature", dom).into());
            }
            if doms[..i].contains(dom) {
                return Err(format!("domain {} repeated in signature", dom).into());
            }
        }
        let mut seen = Vec::new();
        for name in order_names(order) {
            if !doms.iter().any(|d| d == name) {
                return Err(format!("order {} names unknown domain {}", order, name).into());
            }
            if seen.contains(&name) {
                return Err(format!("order {} names {} twice", order, name).into());
            }
            seen.push(name);
        }
        if seen.len() != doms.len() {
            return Err(format!("order {} does not cover every column", order).into());
        }
        Ok(RelSign {
            doms,
            order: order.to_string(),
        })
    }

    /// A signature over `doms` with the trivial order `D0_D1_...`.
    pub fn with_default_order<S: AsRef<str>>(doms: &[S]) -> Result<RelSign, Error> {
        let order = doms
            .iter()
            .map(|d| d.as_ref())
            .collect::<Vec<&str>>()
            .join("_");
        RelSign::new(doms, &order)
    }

    /// Column names, such as `C0`.
    pub fn minor_doms(&self) -> &[String] {
        &self.doms
    }

    /// Domain of each column, such as `C`.
    pub fn major_doms(&self) -> Vec<&str> {
        self.doms.iter().map(|d| major_name(d)).collect()
    }

    pub fn order(&self) -> &str {
        &self.order
    }

    pub fn arity(&self) -> usize {
        self.doms.len()
    }
}

impl FromStr for RelSign {
    type Err = Error;

    fn from_str(s: &str) -> Result<RelSign, Error> {
        let (doms, order) = s
            .split_once(':')
            .ok_or_else(|| Error::from(format!("signature {} has no order", s)))?;
        let doms: Vec<&str> = doms.split(',').map(|d| d.trim()).collect();
        RelSign::new(&doms, order.trim())
    }
}

impl fmt::Display for RelSign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.doms.join(","), self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signature() {
        let sign: RelSign = "C0,I0,C1,M0:C0xC1_I0_M0".parse().unwrap();
        assert_eq!(sign.arity(), 4);
        assert_eq!(sign.major_doms(), vec!["C", "I", "C", "M"]);
        assert_eq!(sign.order(), "C0xC1_I0_M0");
        assert_eq!(sign.to_string(), "C0,I0,C1,M0:C0xC1_I0_M0");
    }

    #[test]
    fn reject_bad_signatures() {
        assert!("C0,I0".parse::<RelSign>().is_err());
        assert!("C,I0:C_I0".parse::<RelSign>().is_err());
        assert!("C0,I0:C0".parse::<RelSign>().is_err());
        assert!("C0,I0:C0_M0".parse::<RelSign>().is_err());
        assert!("C0,C0:C0_C0".parse::<RelSign>().is_err());
    }

    #[test]
    fn default_order() {
        let sign = RelSign::with_default_order(&["V0", "H0"]).unwrap();
        assert_eq!(sign.to_string(), "V0,H0:V0_H0");
        assert_eq!(major_name("H12"), "H");
    }
}
