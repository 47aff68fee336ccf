/// Arena keyed by stable newtype ids. Removal leaves a hole so ids held by
/// the def-use ledger and by in-flight rewrites can never dangle; holes are
/// never reused within a function's lifetime.
#[derive(Clone)]
pub struct Pool<T: PoolElement> {
    slots: Vec<Option<T>>,
}

pub trait PoolElement {
    type Id: Copy + Eq + std::hash::Hash + Into<usize> + From<usize>;

    fn id(&self) -> Self::Id;
    fn set_id(&mut self, id: Self::Id);
}

impl<T: PoolElement> Pool<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn add(&mut self, mut element: T) -> T::Id {
        let index = self.slots.len();
        element.set_id(index.into());
        self.slots.push(Some(element));
        index.into()
    }

    pub fn at(&self, id: T::Id) -> Option<&T> {
        self.slots.get(id.into()).and_then(|slot| slot.as_ref())
    }

    pub fn at_mut(&mut self, id: T::Id) -> Option<&mut T> {
        self.slots.get_mut(id.into()).and_then(|slot| slot.as_mut())
    }

    pub fn contains(&self, id: T::Id) -> bool {
        self.at(id).is_some()
    }

    pub fn remove(&mut self, id: T::Id) -> T {
        self.slots[id.into()]
            .take()
            .unwrap_or_else(|| panic!("removing dead pool element"))
    }

    /// Number of slots ever allocated, holes included.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    pub fn ids(&self) -> impl Iterator<Item = T::Id> + '_ {
        self.iter().map(|element| element.id())
    }
}

impl<T: PoolElement> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
