use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;

use crate::alias::Ctxt;
use crate::program::InstId;

/// An abstract object: the object contexts it may have been allocated in.
///
/// Under object sensitivity an object context starts with the allocation
/// site itself, followed by the context of the allocating method.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AbstractObject {
    ctxts: BTreeSet<Ctxt>,
}

impl AbstractObject {
    pub fn new<I: IntoIterator<Item = Ctxt>>(ctxts: I) -> AbstractObject {
        AbstractObject {
            ctxts: ctxts.into_iter().collect(),
        }
    }

    pub fn ctxts(&self) -> &BTreeSet<Ctxt> {
        &self.ctxts
    }

    pub fn insert(&mut self, ctxt: Ctxt) -> bool {
        self.ctxts.insert(ctxt)
    }

    pub fn is_empty(&self) -> bool {
        self.ctxts.is_empty()
    }

    /// Two abstract objects may alias if they share a context.
    pub fn may_alias(&self, other: &AbstractObject) -> bool {
        !self.ctxts.is_disjoint(&other.ctxts)
    }
}

impl fmt::Display for AbstractObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ctxts: Vec<String> = self.ctxts.iter().map(|c| c.to_string()).collect();
        write!(f, "{{{}}}", ctxts.join(","))
    }
}

/// Points-to facts for call receivers, as needed by object sensitive call
/// graph construction.
pub trait ReceiverObjects {
    /// The objects the receiver of `site` may point to when the caller runs
    /// in `ctxt`.
    fn receiver(&self, ctxt: &Ctxt, site: InstId) -> Option<&AbstractObject>;
}

impl ReceiverObjects for FxHashMap<(Ctxt, InstId), AbstractObject> {
    fn receiver(&self, ctxt: &Ctxt, site: InstId) -> Option<&AbstractObject> {
        self.get(&(ctxt.clone(), site))
    }
}

/// No receiver information at all.
pub struct NoReceivers;

impl ReceiverObjects for NoReceivers {
    fn receiver(&self, _: &Ctxt, _: InstId) -> Option<&AbstractObject> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(ctxts: &[&[usize]]) -> AbstractObject {
        AbstractObject::new(
            ctxts
                .iter()
                .map(|sites| Ctxt::new(sites.iter().map(|&s| InstId(s)).collect())),
        )
    }

    #[test]
    fn may_alias_iff_shared_context() {
        let a = obj(&[&[0], &[5, 1]]);
        let b = obj(&[&[5, 1], &[5, 2]]);
        let c = obj(&[&[5]]);
        assert!(a.may_alias(&b));
        assert!(b.may_alias(&a));
        assert!(!a.may_alias(&c));
        assert!(!AbstractObject::default().may_alias(&a));
        assert_eq!(c.to_string(), "{[i5]}");
    }

    #[test]
    fn receiver_lookup() {
        let mut facts = FxHashMap::default();
        facts.insert((Ctxt::epsilon(), InstId(1)), obj(&[&[0]]));
        assert!(facts.receiver(&Ctxt::epsilon(), InstId(1)).is_some());
        assert!(facts.receiver(&Ctxt::epsilon(), InstId(2)).is_none());
        assert!(NoReceivers.receiver(&Ctxt::epsilon(), InstId(1)).is_none());
    }
}
