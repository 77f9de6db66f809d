use std::collections::BTreeMap;
use roaring::RoaringBitmap;

/// Domain-value key (possibly composite, `"3|7"`) to the positions holding it.
pub type BitmapCollection = BTreeMap<String, RoaringBitmap>;

/// Separator between the parts of a composite group key.
pub const KEY_SEPARATOR: char = '|';

/// Intersection and union over bitmap collections.
pub struct SetAlgebra;

impl SetAlgebra {
    /// Cross-product intersection.
    ///
    /// The result is seeded from the first collection; every later
    /// collection pairs each existing key with each of its own keys, ANDs
    /// the bitmaps and joins the keys with `|`. Key counts multiply at every
    /// step, so narrow the inputs (see [`SetAlgebra::restrict`]) before
    /// crossing high-cardinality dimensions.
    pub fn intersect(collections: &[BitmapCollection]) -> BitmapCollection {
        let Some((first, rest)) = collections.split_first() else {
            return BitmapCollection::new();
        };
        let mut result = first.clone();
        for collection in rest {
            let mut next = BitmapCollection::new();
            for (left_key, left) in &result {
                for (right_key, right) in collection {
                    next.insert(
                        format!("{}{}{}", left_key, KEY_SEPARATOR, right_key),
                        left & right,
                    );
                }
            }
            result = next;
        }
        result
    }

    /// OR every bitmap into the result under its own key.
    pub fn union(collections: &[BitmapCollection]) -> BitmapCollection {
        let mut result = BitmapCollection::new();
        for collection in collections {
            for (key, bitmap) in collection {
                match result.get_mut(key) {
                    Some(existing) => *existing |= bitmap,
                    None => {
                        result.insert(key.clone(), bitmap.clone());
                    }
                }
            }
        }
        result
    }

    /// Keyed view of a distribution; empty bitmaps are left out.
    pub fn from_distribution(bitmaps: &[RoaringBitmap]) -> BitmapCollection {
        bitmaps
            .iter()
            .enumerate()
            .filter(|(_, bitmap)| !bitmap.is_empty())
            .map(|(value, bitmap)| (value.to_string(), bitmap.clone()))
            .collect()
    }

    pub fn prune_empty(collection: &mut BitmapCollection) {
        collection.retain(|_, bitmap| !bitmap.is_empty());
    }

    /// AND every group with `filter`, dropping groups that become empty.
    pub fn restrict(collection: &BitmapCollection, filter: &RoaringBitmap) -> BitmapCollection {
        collection
            .iter()
            .map(|(key, bitmap)| (key.clone(), bitmap & filter))
            .filter(|(_, bitmap)| !bitmap.is_empty())
            .collect()
    }

    pub fn cardinalities(collection: &BitmapCollection) -> BTreeMap<String, u64> {
        collection
            .iter()
            .map(|(key, bitmap)| (key.clone(), bitmap.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(bits: &[u32]) -> RoaringBitmap {
        bits.iter().copied().collect()
    }

    fn collection(entries: &[(&str, &[u32])]) -> BitmapCollection {
        entries.iter().map(|(k, bits)| (k.to_string(), bitmap(bits))).collect()
    }

    #[test]
    fn intersect_crosses_keys() {
        let (a, b, c) = (10, 11, 12);
        let result = SetAlgebra::intersect(&[
            collection(&[("1", &[a, b])]),
            collection(&[("2", &[b, c])]),
        ]);
        assert_eq!(result.len(), 1);
        assert_eq!(result["1|2"], bitmap(&[b]));
    }

    #[test]
    fn intersect_multiplies_key_count() {
        let left = collection(&[("1", &[0, 1, 2]), ("2", &[3, 4])]);
        let right = collection(&[("x", &[0, 3]), ("y", &[1, 4]), ("z", &[9])]);
        let third = collection(&[("p", &[0, 1, 3, 4])]);

        let result = SetAlgebra::intersect(&[left, right, third]);
        assert_eq!(result.len(), 6);
        assert_eq!(result["1|x|p"], bitmap(&[0]));
        assert_eq!(result["2|y|p"], bitmap(&[4]));
        assert!(result["1|z|p"].is_empty());
    }

    #[test]
    fn intersect_of_one_or_none() {
        assert!(SetAlgebra::intersect(&[]).is_empty());
        let only = collection(&[("5", &[1, 2])]);
        assert_eq!(SetAlgebra::intersect(std::slice::from_ref(&only)), only);
    }

    #[test]
    fn union_merges_same_keys() {
        let result = SetAlgebra::union(&[
            collection(&[("1", &[0, 2]), ("2", &[5])]),
            collection(&[("1", &[1, 2]), ("3", &[7])]),
        ]);
        assert_eq!(result["1"], bitmap(&[0, 1, 2]));
        assert_eq!(result["2"], bitmap(&[5]));
        assert_eq!(result["3"], bitmap(&[7]));
    }

    #[test]
    fn restrict_and_prune() {
        let mut groups = SetAlgebra::from_distribution(&[
            bitmap(&[]),
            bitmap(&[0, 1]),
            bitmap(&[2, 3]),
        ]);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["1", "2"]);

        let narrowed = SetAlgebra::restrict(&groups, &bitmap(&[1, 5]));
        assert_eq!(SetAlgebra::cardinalities(&narrowed), BTreeMap::from([("1".to_string(), 1)]));

        groups.insert("9".into(), RoaringBitmap::new());
        SetAlgebra::prune_empty(&mut groups);
        assert_eq!(groups.len(), 2);
    }
}
