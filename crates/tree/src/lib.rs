//! Fixed-arity Merkle trees over Poseidon.
//!
//! Every tree in the protocol is quinary (degree five, matching the
//! five-input Poseidon permutation), but the degree is a constructor
//! parameter and is honored everywhere a node's children are sliced.
//! Zero-subtree hashes are precomputed per level so sparse trees hash in
//! `O(depth)` per update, and roots of shallow trees can be lifted to a
//! deeper geometry without materializing the padding.

use ark_bn254::Fr;

use amaci_crypto::poseidon;

/// Errors raised by tree construction and access.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Degree outside the supported Poseidon widths.
    #[error("unsupported tree degree {0}")]
    InvalidDegree(usize),
    /// Depth zero or large enough to overflow the node count.
    #[error("unsupported tree depth {0}")]
    InvalidDepth(usize),
    /// Leaf index at or beyond the tree capacity.
    #[error("leaf index {index} out of bounds for capacity {capacity}")]
    LeafIndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Tree capacity `degree^depth`.
        capacity: usize,
    },
    /// A zero-hash table was too short for the requested extension.
    #[error("zero hash table of length {len} cannot extend to depth {to}")]
    ZerosTooShort {
        /// Table length.
        len: usize,
        /// Requested target depth.
        to: usize,
    },
    /// Root extension with `to_depth` below `from_depth`.
    #[error("cannot extend root from depth {from} to shallower depth {to}")]
    ShrinkingExtension {
        /// Source depth.
        from: usize,
        /// Target depth.
        to: usize,
    },
}

/// Hash one node's children; the slice length is the configured degree.
fn hash_children(children: &[Fr]) -> Fr {
    poseidon::hash_n(children).expect("degree in 2..=5 is a supported poseidon width")
}

/// Precompute the zero-subtree hashes `zeros[0..=depth]` where
/// `zeros[0] = zero_leaf` and `zeros[i+1]` hashes `degree` copies of
/// `zeros[i]`.
pub fn compute_zero_hashes(
    degree: usize,
    depth: usize,
    zero_leaf: Fr,
) -> Result<Vec<Fr>, TreeError> {
    if !(2..=5).contains(&degree) {
        return Err(TreeError::InvalidDegree(degree));
    }
    let mut zeros = Vec::with_capacity(depth + 1);
    zeros.push(zero_leaf);
    for level in 0..depth {
        let children = vec![zeros[level]; degree];
        zeros.push(hash_children(&children));
    }
    Ok(zeros)
}

/// Lift a depth-`from_depth` root to depth `to_depth` by hashing it against
/// zero subtrees, as if the original tree occupied the first child slot at
/// every new level. Runs in `O(to_depth - from_depth)`.
pub fn extend_tree_root(
    root: Fr,
    from_depth: usize,
    to_depth: usize,
    zeros: &[Fr],
    degree: usize,
) -> Result<Fr, TreeError> {
    if !(2..=5).contains(&degree) {
        return Err(TreeError::InvalidDegree(degree));
    }
    if to_depth < from_depth {
        return Err(TreeError::ShrinkingExtension {
            from: from_depth,
            to: to_depth,
        });
    }
    if zeros.len() < to_depth {
        return Err(TreeError::ZerosTooShort {
            len: zeros.len(),
            to: to_depth,
        });
    }
    let mut current = root;
    for level in from_depth..to_depth {
        let mut children = vec![zeros[level]; degree];
        children[0] = current;
        current = hash_children(&children);
    }
    Ok(current)
}

/// A fixed-degree Merkle tree with per-level node storage.
#[derive(Clone, Debug)]
pub struct QuinTree {
    degree: usize,
    depth: usize,
    zero_leaf: Fr,
    zeros: Vec<Fr>,
    /// `levels[0]` holds the leaves; `levels[depth]` holds the root.
    levels: Vec<Vec<Fr>>,
}

impl QuinTree {
    /// Build an empty tree of `degree^depth` zero leaves.
    pub fn new(degree: usize, depth: usize, zero_leaf: Fr) -> Result<Self, TreeError> {
        if !(2..=5).contains(&degree) {
            return Err(TreeError::InvalidDegree(degree));
        }
        if depth == 0 {
            return Err(TreeError::InvalidDepth(depth));
        }
        let capacity = degree
            .checked_pow(u32::try_from(depth).map_err(|_| TreeError::InvalidDepth(depth))?)
            .ok_or(TreeError::InvalidDepth(depth))?;

        let zeros = compute_zero_hashes(degree, depth, zero_leaf)?;
        let mut levels = Vec::with_capacity(depth + 1);
        let mut width = capacity;
        for zero in zeros.iter().take(depth + 1) {
            levels.push(vec![*zero; width]);
            width /= degree;
        }

        Ok(Self {
            degree,
            depth,
            zero_leaf,
            zeros,
            levels,
        })
    }

    /// Tree degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Tree depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Leaf capacity `degree^depth`.
    pub fn capacity(&self) -> usize {
        self.levels[0].len()
    }

    /// The zero-subtree hash table `zeros[0..=depth]`.
    pub fn zeros(&self) -> &[Fr] {
        &self.zeros
    }

    /// All leaves in index order.
    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    /// The root hash; equals `zeros[depth]` for an empty tree.
    pub fn root(&self) -> Fr {
        self.levels[self.depth][0]
    }

    fn check_bounds(&self, index: usize) -> Result<(), TreeError> {
        // `>=`: index `degree^depth` itself is one past the last leaf.
        if index >= self.capacity() {
            return Err(TreeError::LeafIndexOutOfBounds {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// The leaf at `index`.
    pub fn leaf(&self, index: usize) -> Result<Fr, TreeError> {
        self.check_bounds(index)?;
        Ok(self.levels[0][index])
    }

    /// Set leaf `index` to `value` and rehash the `depth` parents on its
    /// path.
    pub fn update_leaf(&mut self, index: usize, value: Fr) -> Result<(), TreeError> {
        self.check_bounds(index)?;
        self.levels[0][index] = value;
        let mut node = index;
        for level in 0..self.depth {
            node /= self.degree;
            let start = node * self.degree;
            let parent = hash_children(&self.levels[level][start..start + self.degree]);
            self.levels[level + 1][node] = parent;
        }
        Ok(())
    }

    /// Bulk-load leaves from index zero and rebuild the whole tree
    /// bottom-up. Leaves beyond the capacity are dropped with a warning.
    pub fn init_leaves(&mut self, leaves: &[Fr]) {
        let capacity = self.capacity();
        if leaves.len() > capacity {
            log::warn!(
                "init_leaves: dropping {} leaves beyond capacity {}",
                leaves.len() - capacity,
                capacity
            );
        }
        let take = leaves.len().min(capacity);
        self.levels[0][..take].copy_from_slice(&leaves[..take]);
        for slot in self.levels[0][take..].iter_mut() {
            *slot = self.zero_leaf;
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        for level in 0..self.depth {
            let parents: Vec<Fr> = self.levels[level]
                .chunks(self.degree)
                .map(hash_children)
                .collect();
            self.levels[level + 1] = parents;
        }
    }

    /// Base-`degree` digits of `index`, least significant first; one digit
    /// per level.
    pub fn path_index_of(&self, index: usize) -> Result<Vec<usize>, TreeError> {
        self.check_bounds(index)?;
        let mut digits = Vec::with_capacity(self.depth);
        let mut rest = index;
        for _ in 0..self.depth {
            digits.push(rest % self.degree);
            rest /= self.degree;
        }
        Ok(digits)
    }

    /// Sibling hashes along the path to the root: for each level, the
    /// `degree - 1` siblings in ascending child order, omitting the slot the
    /// path occupies.
    pub fn path_element_of(&self, index: usize) -> Result<Vec<Vec<Fr>>, TreeError> {
        self.check_bounds(index)?;
        let mut path = Vec::with_capacity(self.depth);
        let mut node = index;
        for level in 0..self.depth {
            let position = node % self.degree;
            let start = (node / self.degree) * self.degree;
            let siblings: Vec<Fr> = (0..self.degree)
                .filter(|slot| *slot != position)
                .map(|slot| self.levels[level][start + slot])
                .collect();
            path.push(siblings);
            node /= self.degree;
        }
        Ok(path)
    }

    /// A copy of the tree with every leaf at or beyond `length` reset to the
    /// zero leaf, used to prove against the state truncated to the first
    /// `length` voters.
    pub fn sub_tree(&self, length: usize) -> Result<QuinTree, TreeError> {
        if length > self.capacity() {
            return Err(TreeError::LeafIndexOutOfBounds {
                index: length,
                capacity: self.capacity(),
            });
        }
        let mut truncated = self.clone();
        for slot in truncated.levels[0][length..].iter_mut() {
            *slot = self.zero_leaf;
        }
        truncated.rebuild();
        Ok(truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaci_crypto::poseidon::hash5;
    use amaci_types::TREE_DEGREE;
    use ark_ff::Field;
    use ark_std::UniformRand;

    fn verify_path(
        tree: &QuinTree,
        index: usize,
        leaf: Fr,
    ) -> Fr {
        let digits = tree.path_index_of(index).expect("digits");
        let path = tree.path_element_of(index).expect("path");
        let mut current = leaf;
        for (digit, siblings) in digits.iter().zip(path.iter()) {
            let mut children = Vec::with_capacity(tree.degree());
            children.extend_from_slice(&siblings[..*digit]);
            children.push(current);
            children.extend_from_slice(&siblings[*digit..]);
            current = hash_children(&children);
        }
        current
    }

    #[test]
    fn empty_root_is_zero_hash() {
        let tree = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        assert_eq!(tree.root(), tree.zeros()[2]);
        assert_eq!(tree.capacity(), 25);
    }

    #[test]
    fn bounds_use_strict_upper_check() {
        let mut tree = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        assert!(tree.leaf(24).is_ok());
        assert!(matches!(
            tree.leaf(25),
            Err(TreeError::LeafIndexOutOfBounds {
                index: 25,
                capacity: 25
            })
        ));
        assert!(tree.update_leaf(25, Fr::ONE).is_err());
    }

    #[test]
    fn update_leaf_matches_bulk_init() {
        let mut rng = ark_std::test_rng();
        let leaves: Vec<Fr> = (0..7).map(|_| Fr::rand(&mut rng)).collect();

        let mut incremental = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        for (i, leaf) in leaves.iter().enumerate() {
            incremental.update_leaf(i, *leaf).expect("update");
        }

        let mut bulk = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        bulk.init_leaves(&leaves);

        assert_eq!(incremental.root(), bulk.root());
        assert_eq!(incremental.leaf(3).expect("leaf"), leaves[3]);
    }

    #[test]
    fn root_matches_manual_fold() {
        let mut tree = QuinTree::new(TREE_DEGREE, 1, Fr::ZERO).expect("tree");
        let leaves: [Fr; 5] = core::array::from_fn(|i| Fr::from(i as u64 + 1));
        for (i, leaf) in leaves.iter().enumerate() {
            tree.update_leaf(i, *leaf).expect("update");
        }
        assert_eq!(tree.root(), hash5(&leaves));
    }

    #[test]
    fn path_shape_and_verification() {
        let mut rng = ark_std::test_rng();
        let mut tree = QuinTree::new(TREE_DEGREE, 3, Fr::ZERO).expect("tree");
        for i in 0..30 {
            tree.update_leaf(i, Fr::rand(&mut rng)).expect("update");
        }
        for index in [0usize, 4, 17, 29, 124] {
            let digits = tree.path_index_of(index).expect("digits");
            let path = tree.path_element_of(index).expect("path");
            assert_eq!(digits.len(), 3);
            assert_eq!(path.len(), 3);
            assert!(path.iter().all(|siblings| siblings.len() == 4));
            let leaf = tree.leaf(index).expect("leaf");
            assert_eq!(verify_path(&tree, index, leaf), tree.root());
        }
    }

    #[test]
    fn path_index_is_base_five() {
        let tree = QuinTree::new(TREE_DEGREE, 3, Fr::ZERO).expect("tree");
        // 117 = 2 + 3*5 + 4*25
        assert_eq!(tree.path_index_of(117).expect("digits"), vec![2, 3, 4]);
    }

    #[test]
    fn sub_tree_zeroes_the_tail() {
        let mut rng = ark_std::test_rng();
        let mut tree = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        let leaves: Vec<Fr> = (0..10).map(|_| Fr::rand(&mut rng)).collect();
        tree.init_leaves(&leaves);

        let truncated = tree.sub_tree(4).expect("sub tree");
        let mut expected = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        expected.init_leaves(&leaves[..4]);
        assert_eq!(truncated.root(), expected.root());

        // The original is untouched.
        assert_eq!(tree.leaf(7).expect("leaf"), leaves[7]);
        assert!(tree.sub_tree(26).is_err());
    }

    #[test]
    fn extended_root_matches_deeper_tree() {
        let mut rng = ark_std::test_rng();
        let leaves: Vec<Fr> = (0..25).map(|_| Fr::rand(&mut rng)).collect();

        let mut shallow = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
        shallow.init_leaves(&leaves);

        let mut deep = QuinTree::new(TREE_DEGREE, 4, Fr::ZERO).expect("tree");
        deep.init_leaves(&leaves);

        let zeros = compute_zero_hashes(TREE_DEGREE, 4, Fr::ZERO).expect("zeros");
        let lifted =
            extend_tree_root(shallow.root(), 2, 4, &zeros, TREE_DEGREE).expect("extend");
        assert_eq!(lifted, deep.root());
    }

    #[test]
    fn extend_rejects_bad_arguments() {
        let zeros = compute_zero_hashes(TREE_DEGREE, 2, Fr::ZERO).expect("zeros");
        assert!(matches!(
            extend_tree_root(Fr::ZERO, 3, 2, &zeros, TREE_DEGREE),
            Err(TreeError::ShrinkingExtension { from: 3, to: 2 })
        ));
        assert!(matches!(
            extend_tree_root(Fr::ZERO, 0, 5, &zeros, TREE_DEGREE),
            Err(TreeError::ZerosTooShort { len: 3, to: 5 })
        ));
    }

    #[test]
    fn init_leaves_drops_excess() {
        let mut tree = QuinTree::new(TREE_DEGREE, 1, Fr::ZERO).expect("tree");
        let leaves: Vec<Fr> = (0..8).map(|i| Fr::from(i as u64)).collect();
        tree.init_leaves(&leaves);
        assert_eq!(tree.leaf(4).expect("leaf"), Fr::from(4u64));

        let mut expected = QuinTree::new(TREE_DEGREE, 1, Fr::ZERO).expect("tree");
        expected.init_leaves(&leaves[..5]);
        assert_eq!(tree.root(), expected.root());
    }
}
