use opencv::core::Rect;

/// Axis-aligned box in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from its center point and size, as YOLO heads emit them.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2., cy - height / 2., width, height)
    }

    /// Builds a box from two corners.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.) * self.height.max(0.)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0. || h <= 0. {
            return 0.;
        }
        w * h
    }

    pub fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    /// Intersection over union, 0 for degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0. {
            return 0.;
        }
        self.intersection(other) / union
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x.round() as i32,
            self.y.round() as i32,
            self.width.round() as i32,
            self.height.round() as i32,
        )
    }
}

/// One predicted object instance for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: usize, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }
}
