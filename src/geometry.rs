//! Bounding-box helpers shared by the resolver, the stability filter and the task handlers.
//!
//! Boxes are `[x1, y1, x2, y2]` in pixels with `x1 <= x2` and `y1 <= y2`.

pub type BBox = [f32; 4];

pub fn center(bbox: &BBox) -> (f32, f32) {
    (
        (bbox[2] - bbox[0]).abs() / 2.0 + bbox[0],
        (bbox[3] - bbox[1]).abs() / 2.0 + bbox[1],
    )
}

pub fn height(bbox: &BBox) -> f32 {
    bbox[3] - bbox[1]
}

/// Euclidean distance between the centers of two boxes.
pub fn center_distance(a: &BBox, b: &BBox) -> f32 {
    let (ax, ay) = center(a);
    let (bx, by) = center(b);
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

/// Half-open overlap on both axes. Symmetric; touching edges do not intersect.
pub fn intersects(a: &BBox, b: &BBox) -> bool {
    let horizontal = a[2] > b[0] && a[0] < b[2];
    let vertical = a[3] > b[1] && a[1] < b[3];
    horizontal && vertical
}

/// Axis used to order two objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Order by left edge (left, right).
    Horizontal,
    /// Order by top edge (top, bottom).
    Vertical,
}

/// Order two items by their box's leading edge on `axis`.
pub fn separate_two<T, F>(a: T, b: T, axis: Axis, bbox: F) -> (T, T)
where
    F: Fn(&T) -> BBox,
{
    let dim = match axis {
        Axis::Horizontal => 0,
        Axis::Vertical => 1,
    };
    if bbox(&a)[dim] < bbox(&b)[dim] {
        (a, b)
    } else {
        (b, a)
    }
}

/// Arrange four items laid out in a 2x2 grid as
/// `[top_left, top_right, bottom_left, bottom_right]`.
///
/// Rows are the two smallest and two largest center y values; each row is
/// then ordered by center x.
pub fn separate_four_rect<T, F>(items: [T; 4], bbox: F) -> [T; 4]
where
    F: Fn(&T) -> BBox,
{
    let mut items = items;
    items.sort_by(|a, b| center(&bbox(a)).1.total_cmp(&center(&bbox(b)).1));
    let [a, b, c, d] = items;
    let (top_left, top_right) = order_by_center_x(a, b, &bbox);
    let (bottom_left, bottom_right) = order_by_center_x(c, d, &bbox);
    [top_left, top_right, bottom_left, bottom_right]
}

fn order_by_center_x<T, F>(a: T, b: T, bbox: &F) -> (T, T)
where
    F: Fn(&T) -> BBox,
{
    if center(&bbox(&a)).0 <= center(&bbox(&b)).0 {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_symmetric_and_half_open() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 5.0, 15.0, 15.0];
        let touching = [10.0, 0.0, 20.0, 10.0];
        assert!(intersects(&a, &b));
        assert!(intersects(&b, &a));
        assert!(!intersects(&a, &touching));
        assert!(!intersects(&touching, &a));
    }

    #[test]
    fn contained_box_intersects() {
        let outer = [0.0, 0.0, 100.0, 100.0];
        let inner = [40.0, 40.0, 60.0, 60.0];
        assert!(intersects(&outer, &inner));
        assert!(intersects(&inner, &outer));
    }

    #[test]
    fn center_distance_is_euclidean() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [3.0, 4.0, 13.0, 14.0];
        assert!((center_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn four_rect_orders_grid() {
        let boxes = [
            [300.0, 300.0, 350.0, 350.0],
            [10.0, 10.0, 60.0, 60.0],
            [10.0, 300.0, 60.0, 350.0],
            [300.0, 12.0, 350.0, 62.0],
        ];
        let [tl, tr, bl, br] = separate_four_rect(boxes, |b| *b);
        assert_eq!(tl[0], 10.0);
        assert_eq!(tl[1], 10.0);
        assert_eq!(tr[0], 300.0);
        assert_eq!(bl[1], 300.0);
        assert_eq!(br[0], 300.0);
        assert_eq!(br[1], 300.0);
    }
}
