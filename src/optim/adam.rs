use crate::math::matrix::Matrix;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-8;

/// Adam with bias correction, for one parameter matrix.
#[derive(Debug, Clone)]
pub struct Adam {
    m: Matrix,
    v: Matrix,
    t: i32,
}

impl Adam {
    pub fn new(shape_of: &Matrix) -> Adam {
        Adam { m: shape_of.zeros_like(), v: shape_of.zeros_like(), t: 0 }
    }

    pub fn update(&mut self, param: &mut Matrix, grad: &Matrix, lr: f64) {
        self.t += 1;
        self.m = self.m.zip_map(grad, |m, g| BETA1 * m + (1.0 - BETA1) * g);
        self.v = self.v.zip_map(grad, |v, g| BETA2 * v + (1.0 - BETA2) * g * g);

        let c1 = 1.0 - BETA1.powi(self.t);
        let c2 = 1.0 - BETA2.powi(self.t);
        let step = self.m.zip_map(&self.v, |m, v| (m / c1) / ((v / c2).sqrt() + EPS));
        *param = param.zip_map(&step, |p, s| p - lr * s);
    }
}
