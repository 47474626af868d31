//! Generic N-dimensional binned container.
//!
//! A [`BinnedContainer`] stores one `T` per Cartesian bin combination of its
//! axes, flattened row-major (the last axis varies fastest). A container
//! without axes is "integrated" and holds exactly one slot.

use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::error::{Error, Result};

/// N-dimensional array of `T` addressed by per-axis bin indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinnedContainer<T> {
    axes: Vec<Axis>,
    data: Vec<T>,
    #[serde(skip)]
    populated: bool,
}

impl<T: PartialEq> PartialEq for BinnedContainer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.axes == other.axes && self.data == other.data
    }
}

impl<T: Default> Default for BinnedContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn product_len(axes: &[Axis]) -> usize {
    axes.iter().map(Axis::len).product()
}

fn check_unique_names(axes: &[Axis]) -> Result<()> {
    for (i, a) in axes.iter().enumerate() {
        if axes[..i].iter().any(|b| b.name() == a.name()) {
            return Err(Error::Validation(format!("duplicate axis name '{}'", a.name())));
        }
    }
    Ok(())
}

impl<T> BinnedContainer<T> {
    /// Integrated container (no axes, one default slot).
    pub fn new() -> Self
    where
        T: Default,
    {
        Self { axes: Vec::new(), data: vec![T::default()], populated: false }
    }

    /// Container over `axes` with every slot set to `T::default()`.
    pub fn with_axes(axes: Vec<Axis>) -> Result<Self>
    where
        T: Default,
    {
        Self::from_fn(axes, |_| T::default()).map(|mut c| {
            c.populated = false;
            c
        })
    }

    /// Container over `axes` whose slot `i` (linear index) is `f(i)`.
    pub fn from_fn(axes: Vec<Axis>, f: impl FnMut(usize) -> T) -> Result<Self> {
        check_unique_names(&axes)?;
        let n = product_len(&axes);
        let data = (0..n).map(f).collect();
        Ok(Self { axes, data, populated: true })
    }

    /// Append an axis. Fails once any slot has been written.
    pub fn add_axis(&mut self, axis: Axis) -> Result<()>
    where
        T: Default,
    {
        if self.populated {
            return Err(Error::Validation(format!(
                "cannot add axis '{}' to a populated container",
                axis.name()
            )));
        }
        if self.axes.iter().any(|a| a.name() == axis.name()) {
            return Err(Error::Validation(format!("duplicate axis name '{}'", axis.name())));
        }
        self.axes.push(axis);
        let n = product_len(&self.axes);
        self.data.clear();
        self.data.resize_with(n, T::default);
        Ok(())
    }

    /// Append several axes. See [`BinnedContainer::add_axis`].
    pub fn add_axes(&mut self, axes: impl IntoIterator<Item = Axis>) -> Result<()>
    where
        T: Default,
    {
        for a in axes {
            self.add_axis(a)?;
        }
        Ok(())
    }

    /// Axes in iteration order.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Position of the named axis.
    pub fn axis_position(&self, name: &str) -> Result<usize> {
        self.axes
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| Error::AxisNotFound(name.to_string()))
    }

    /// The named axis.
    pub fn axis(&self, name: &str) -> Result<&Axis> {
        Ok(&self.axes[self.axis_position(name)?])
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    /// Whether the container has no axes (single slot).
    pub fn is_integrated(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of slots (product of axis sizes).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`: a container has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flatten a multi-index (one bin index per axis).
    pub fn index_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.axes.len() {
            return Err(Error::OutOfRange(format!(
                "expected {} indices, got {}",
                self.axes.len(),
                index.len()
            )));
        }
        let mut linear = 0usize;
        for (axis, &i) in self.axes.iter().zip(index) {
            if i >= axis.len() {
                return Err(Error::OutOfRange(format!(
                    "index {i} outside axis '{}' ({} bins)",
                    axis.name(),
                    axis.len()
                )));
            }
            linear = linear * axis.len() + i;
        }
        Ok(linear)
    }

    /// Expand a linear index into one bin index per axis.
    pub fn multi_index(&self, mut linear: usize) -> Vec<usize> {
        let mut index = vec![0usize; self.axes.len()];
        for (slot, axis) in index.iter_mut().zip(&self.axes).rev() {
            *slot = linear % axis.len();
            linear /= axis.len();
        }
        index
    }

    /// Linear index of the bin containing `coordinates` (one value per axis).
    ///
    /// `None` if any coordinate falls outside its axis.
    pub fn find_bin(&self, coordinates: &[f64]) -> Option<usize> {
        if coordinates.len() != self.axes.len() {
            return None;
        }
        let mut linear = 0usize;
        for (axis, &v) in self.axes.iter().zip(coordinates) {
            linear = linear * axis.len() + axis.find_bin(v)?;
        }
        Some(linear)
    }

    /// Element at a multi-index.
    pub fn at(&self, index: &[usize]) -> Result<&T> {
        let i = self.index_of(index)?;
        Ok(&self.data[i])
    }

    /// Mutable element at a multi-index.
    pub fn at_mut(&mut self, index: &[usize]) -> Result<&mut T> {
        let i = self.index_of(index)?;
        self.populated = true;
        Ok(&mut self.data[i])
    }

    /// Element at a linear index.
    pub fn get(&self, linear: usize) -> Option<&T> {
        self.data.get(linear)
    }

    /// Mutable element at a linear index.
    pub fn get_mut(&mut self, linear: usize) -> Option<&mut T> {
        self.populated = true;
        self.data.get_mut(linear)
    }

    /// Slots in linear order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterate over slots in linear order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    /// Mutably iterate over slots in linear order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.populated = true;
        self.data.iter_mut()
    }

    /// Reset every slot to `T::default()`, keeping the axes.
    pub fn clear(&mut self)
    where
        T: Default,
    {
        self.data.iter_mut().for_each(|v| *v = T::default());
        self.populated = false;
    }

    /// Check that the stored slot count matches the axes (e.g. after deserialization).
    pub fn check_shape(&self) -> Result<()> {
        check_unique_names(&self.axes)?;
        let n = product_len(&self.axes);
        if n != self.data.len() {
            return Err(Error::StructuralMismatch(format!(
                "container holds {} slots but its axes define {n}",
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Fail unless `other` has identical axes (names and edges).
    pub fn check_same_axes<U>(&self, other: &BinnedContainer<U>) -> Result<()> {
        if self.axes.len() != other.axes.len() {
            return Err(Error::StructuralMismatch(format!(
                "dimension mismatch: {} vs {} axes",
                self.axes.len(),
                other.axes.len()
            )));
        }
        for (a, b) in self.axes.iter().zip(&other.axes) {
            if a != b {
                return Err(Error::StructuralMismatch(format!(
                    "axis '{}' does not match axis '{}'",
                    a.name(),
                    b.name()
                )));
            }
        }
        Ok(())
    }

    /// Isomorphic container with every slot transformed by `f`.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> BinnedContainer<U> {
        BinnedContainer {
            axes: self.axes.clone(),
            data: self.data.iter().map(&mut f).collect(),
            populated: true,
        }
    }

    /// Slot-wise combination with a container of identical axes.
    pub fn combine(&self, other: &Self, mut f: impl FnMut(&T, &T) -> T) -> Result<Self> {
        self.check_same_axes(other)?;
        let data = self.data.iter().zip(&other.data).map(|(a, b)| f(a, b)).collect();
        Ok(Self { axes: self.axes.clone(), data, populated: true })
    }

    /// Marginalize every axis not named in `keep`.
    ///
    /// Kept axes retain their original relative order. Slots differing only in
    /// dropped axes are folded into `seed` with `reduce`.
    pub fn project(
        &self,
        keep: &[&str],
        seed: T,
        mut reduce: impl FnMut(&T, &T) -> T,
    ) -> Result<Self>
    where
        T: Clone,
    {
        let mut kept = Vec::with_capacity(keep.len());
        for name in keep {
            kept.push(self.axis_position(name)?);
        }
        kept.sort_unstable();
        kept.dedup();

        let axes: Vec<Axis> = kept.iter().map(|&i| self.axes[i].clone()).collect();
        let mut out = Self::from_fn(axes, |_| seed.clone())?;
        let mut projected = vec![0usize; kept.len()];
        for (linear, value) in self.data.iter().enumerate() {
            let full = self.multi_index(linear);
            for (slot, &axis) in projected.iter_mut().zip(&kept) {
                *slot = full[axis];
            }
            let target = out.index_of(&projected)?;
            out.data[target] = reduce(&out.data[target], value);
        }
        Ok(out)
    }

    /// Restrict the named axis to bins whose centre lies in `[low, high)`,
    /// merging every `rebin_factor` contiguous selected bins with `reduce`.
    ///
    /// A trailing group with fewer than `rebin_factor` bins is kept as a
    /// narrower final bin.
    pub fn select(
        &self,
        axis_name: &str,
        range: (f64, f64),
        rebin_factor: usize,
        seed: T,
        reduce: impl FnMut(&T, &T) -> T,
    ) -> Result<Self>
    where
        T: Clone,
    {
        let position = self.axis_position(axis_name)?;
        let axis = &self.axes[position];
        let factor = rebin_factor.max(1);
        let (low, high) = range;
        let selected: Vec<usize> =
            (0..axis.len()).filter(|&b| axis.center(b) >= low && axis.center(b) < high).collect();
        if selected.is_empty() {
            return Err(Error::Validation(format!(
                "selection [{low}, {high}) on axis '{axis_name}' contains no bins"
            )));
        }
        if selected.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(Error::Validation(format!(
                "selection on axis '{axis_name}' is not contiguous"
            )));
        }

        let mut edges = Vec::with_capacity(selected.len() / factor + 2);
        let mut mapping = vec![None; axis.len()];
        for (k, &bin) in selected.iter().enumerate() {
            if k % factor == 0 {
                edges.push(axis.lower_edge(bin));
            }
            mapping[bin] = Some(k / factor);
        }
        edges.push(axis.upper_edge(selected[selected.len() - 1]));
        let new_axis = Axis::from_edges(axis.name(), edges)?;
        self.regroup(position, new_axis, &mapping, seed, reduce)
    }

    /// Regroup the axis named like `coarse` into `coarse`'s partition.
    ///
    /// Every edge of `coarse` must be an edge of the existing axis. Fine bins
    /// falling outside `coarse` are dropped.
    pub fn rebin(&self, coarse: Axis, seed: T, reduce: impl FnMut(&T, &T) -> T) -> Result<Self>
    where
        T: Clone,
    {
        let position = self.axis_position(coarse.name())?;
        let axis = &self.axes[position];
        if !axis.is_refined_by(&coarse) {
            return Err(Error::StructuralMismatch(format!(
                "axis '{}' cannot be rebinned: new edges are not a subset of the old ones",
                coarse.name()
            )));
        }
        let mapping: Vec<Option<usize>> =
            (0..axis.len()).map(|b| coarse.find_bin(axis.center(b))).collect();
        self.regroup(position, coarse, &mapping, seed, reduce)
    }

    fn regroup(
        &self,
        position: usize,
        new_axis: Axis,
        mapping: &[Option<usize>],
        seed: T,
        mut reduce: impl FnMut(&T, &T) -> T,
    ) -> Result<Self>
    where
        T: Clone,
    {
        let mut axes = self.axes.clone();
        axes[position] = new_axis;
        let mut out = Self::from_fn(axes, |_| seed.clone())?;
        for (linear, value) in self.data.iter().enumerate() {
            let mut index = self.multi_index(linear);
            let Some(target_bin) = mapping[index[position]] else {
                continue;
            };
            index[position] = target_bin;
            let target = out.index_of(&index)?;
            out.data[target] = reduce(&out.data[target], value);
        }
        Ok(out)
    }
}

impl<T: Clone + Add<Output = T>> BinnedContainer<T> {
    /// Slot-wise sum.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        self.combine(other, |a, b| a.clone() + b.clone())
    }
}

impl<T: Clone + Sub<Output = T>> BinnedContainer<T> {
    /// Slot-wise difference.
    pub fn try_sub(&self, other: &Self) -> Result<Self> {
        self.combine(other, |a, b| a.clone() - b.clone())
    }
}

impl<T: Clone + Mul<Output = T>> BinnedContainer<T> {
    /// Slot-wise product.
    pub fn try_mul(&self, other: &Self) -> Result<Self> {
        self.combine(other, |a, b| a.clone() * b.clone())
    }
}

impl<T: Clone + Div<Output = T>> BinnedContainer<T> {
    /// Slot-wise quotient.
    pub fn try_div(&self, other: &Self) -> Result<Self> {
        self.combine(other, |a, b| a.clone() / b.clone())
    }
}

impl<T> Index<usize> for BinnedContainer<T> {
    type Output = T;

    fn index(&self, linear: usize) -> &T {
        &self.data[linear]
    }
}

impl<T> IndexMut<usize> for BinnedContainer<T> {
    fn index_mut(&mut self, linear: usize) -> &mut T {
        self.populated = true;
        &mut self.data[linear]
    }
}

impl<'a, T> IntoIterator for &'a BinnedContainer<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn axes_2x3() -> Vec<Axis> {
        vec![
            Axis::uniform("a", 2, 0.0, 2.0).unwrap(),
            Axis::uniform("b", 3, 0.0, 3.0).unwrap(),
        ]
    }

    #[test]
    fn row_major_layout() {
        let c = BinnedContainer::from_fn(axes_2x3(), |i| i as f64).unwrap();
        assert_eq!(c.len(), 6);
        assert_eq!(*c.at(&[0, 2]).unwrap(), 2.0);
        assert_eq!(*c.at(&[1, 0]).unwrap(), 3.0);
        assert_eq!(c.multi_index(5), vec![1, 2]);
        assert_eq!(c.find_bin(&[1.5, 0.5]), Some(3));
        assert_eq!(c.find_bin(&[2.5, 0.5]), None);
    }

    #[test]
    fn at_out_of_range() {
        let c: BinnedContainer<f64> = BinnedContainer::with_axes(axes_2x3()).unwrap();
        let err = c.at(&[2, 0]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange(_)));
        assert!(c.at(&[0]).is_err());
    }

    #[test]
    fn add_axis_forbidden_once_populated() {
        let mut c: BinnedContainer<f64> = BinnedContainer::new();
        assert_eq!(c.len(), 1);
        c.add_axis(Axis::uniform("x", 4, 0.0, 1.0).unwrap()).unwrap();
        assert_eq!(c.len(), 4);
        *c.at_mut(&[1]).unwrap() = 3.0;
        let err = c.add_axis(Axis::uniform("y", 2, 0.0, 1.0).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        c.clear();
        assert_eq!(c.axes().len(), 1);
        assert!(c.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn combine_mismatch_fails() {
        let a = BinnedContainer::from_fn(axes_2x3(), |i| i as f64).unwrap();
        let b = BinnedContainer::from_fn(
            vec![
                Axis::uniform("a", 2, 0.0, 2.0).unwrap(),
                Axis::from_edges("b", vec![0.0, 1.0, 2.0, 3.5]).unwrap(),
            ],
            |i| i as f64,
        )
        .unwrap();
        assert!(matches!(a.try_add(&b).unwrap_err(), Error::StructuralMismatch(_)));
        let sum = a.try_add(&a).unwrap();
        assert_eq!(sum.as_slice(), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn project_keeps_requested_axis() {
        let c = BinnedContainer::from_fn(axes_2x3(), |i| i as f64).unwrap();
        let pa = c.project(&["a"], 0.0, |x, y| x + y).unwrap();
        assert_eq!(pa.as_slice(), &[3.0, 12.0]);
        let pb = c.project(&["b"], 0.0, |x, y| x + y).unwrap();
        assert_eq!(pb.as_slice(), &[3.0, 5.0, 7.0]);
        assert!(matches!(c.project(&["z"], 0.0, |x, y| x + y), Err(Error::AxisNotFound(_))));
    }

    #[test]
    fn select_and_merge() {
        let c = BinnedContainer::from_fn(
            vec![Axis::uniform("x", 6, 0.0, 6.0).unwrap()],
            |i| (i + 1) as f64,
        )
        .unwrap();
        let s = c.select("x", (1.0, 6.0), 2, 0.0, |a, b| a + b).unwrap();
        assert_eq!(s.axes()[0].edges(), &[1.0, 3.0, 5.0, 6.0]);
        assert_eq!(s.as_slice(), &[5.0, 9.0, 6.0]);
    }

    #[test]
    fn rebin_to_coarser_axis() {
        let c = BinnedContainer::from_fn(
            vec![Axis::uniform("cent", 10, 0.0, 100.0).unwrap()],
            |_| 1.0,
        )
        .unwrap();
        let coarse = Axis::from_edges("cent", vec![0.0, 10.0, 50.0, 100.0]).unwrap();
        let r = c.rebin(coarse, 0.0, |a, b| a + b).unwrap();
        assert_eq!(r.as_slice(), &[1.0, 4.0, 5.0]);
        let bad = Axis::from_edges("cent", vec![0.0, 15.0, 100.0]).unwrap();
        assert!(matches!(c.rebin(bad, 0.0, |a, b| a + b), Err(Error::StructuralMismatch(_))));
    }

    #[test]
    fn map_changes_element_type() {
        let c = BinnedContainer::from_fn(axes_2x3(), |i| i as f64).unwrap();
        let m: BinnedContainer<bool> = c.map(|v| *v > 2.5);
        assert_eq!(m.axes(), c.axes());
        assert_eq!(m.iter().filter(|b| **b).count(), 3);
    }

    proptest! {
        #[test]
        fn prop_full_projection_conserves_sum(
            n_a in 1usize..6,
            n_b in 1usize..6,
            n_c in 1usize..4,
            values in proptest::collection::vec(-1e3f64..1e3, 144),
        ) {
            let axes = vec![
                Axis::uniform("a", n_a, 0.0, 1.0).unwrap(),
                Axis::uniform("b", n_b, 0.0, 1.0).unwrap(),
                Axis::uniform("c", n_c, 0.0, 1.0).unwrap(),
            ];
            let c = BinnedContainer::from_fn(axes, |i| values[i]).unwrap();
            let total: f64 = c.iter().sum();
            let p = c.project(&[], 0.0, |x, y| x + y).unwrap();
            prop_assert_eq!(p.dimension(), 0);
            prop_assert_eq!(p.len(), 1);
            prop_assert!((p[0] - total).abs() <= 1e-9 * (1.0 + total.abs()));
        }

        #[test]
        fn prop_combine_rejects_mismatched_edges(
            n in 1usize..8,
            shift in 1e-6f64..10.0,
        ) {
            let a: BinnedContainer<f64> =
                BinnedContainer::with_axes(vec![Axis::uniform("x", n, 0.0, 1.0).unwrap()]).unwrap();
            let b: BinnedContainer<f64> = BinnedContainer::with_axes(vec![
                Axis::uniform("x", n, 0.0, 1.0 + shift).unwrap(),
            ])
            .unwrap();
            prop_assert!(matches!(a.try_add(&b), Err(Error::StructuralMismatch(_))));
        }
    }
}
