use std::ops::{Add, Mul, Sub};

/// 2次元位置を表す構造体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
}

impl Position2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// ユークリッド距離を計算
    pub fn distance(&self, other: &Position2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 原点から見た方位角を計算（度）
    pub fn angle_deg(&self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }

    /// 極座標（距離・方位角[度]）から位置を生成
    pub fn from_polar(origin: Position2D, distance: f64, angle_deg: f64) -> Self {
        let angle_rad = math_utils::deg_to_rad(angle_deg);
        Self::new(
            origin.x + distance * angle_rad.cos(),
            origin.y + distance * angle_rad.sin(),
        )
    }
}

impl Add<Velocity2D> for Position2D {
    type Output = Self;

    fn add(self, displacement: Velocity2D) -> Self::Output {
        Self::new(self.x + displacement.x, self.y + displacement.y)
    }
}

impl Sub<Velocity2D> for Position2D {
    type Output = Self;

    fn sub(self, displacement: Velocity2D) -> Self::Output {
        Self::new(self.x - displacement.x, self.y - displacement.y)
    }
}

impl Sub for Position2D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

/// 2次元速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity2D {
    pub x: f64, // 単位時間あたり
    pub y: f64,
}

impl Velocity2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Mul<f64> for Velocity2D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

/// ターゲット生成領域（正方形・矩形）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region2D {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Region2D {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self { xmin, xmax, ymin, ymax }
    }

    /// 領域内で円と最も近い点までの距離（円と領域の交差判定用）
    pub fn distance_to(&self, position: &Position2D) -> f64 {
        let nearest = Position2D::new(
            position.x.clamp(self.xmin, self.xmax),
            position.y.clamp(self.ymin, self.ymax),
        );
        nearest.distance(position)
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees * std::f64::consts::PI / 180.0
    }

    /// 角度を-180度〜180度の範囲に正規化
    pub fn normalize_angle(angle_deg: f64) -> f64 {
        let mut normalized = angle_deg % 360.0;
        if normalized > 180.0 {
            normalized -= 360.0;
        } else if normalized <= -180.0 {
            normalized += 360.0;
        }
        normalized
    }
}
