use crate::math::matrix::Matrix;

const RHO: f64 = 0.9;
const EPS: f64 = 1e-6;

/// Adadelta, for one parameter matrix.
#[derive(Debug, Clone)]
pub struct Adadelta {
    square_avg: Matrix,
    acc_delta: Matrix,
}

impl Adadelta {
    pub fn new(shape_of: &Matrix) -> Adadelta {
        Adadelta { square_avg: shape_of.zeros_like(), acc_delta: shape_of.zeros_like() }
    }

    pub fn update(&mut self, param: &mut Matrix, grad: &Matrix, lr: f64) {
        self.square_avg = self.square_avg.zip_map(grad, |s, g| RHO * s + (1.0 - RHO) * g * g);
        let ratio = self.acc_delta.zip_map(&self.square_avg, |a, s| (a + EPS).sqrt() / (s + EPS).sqrt());
        let delta = ratio.zip_map(grad, |r, g| r * g);
        self.acc_delta = self.acc_delta.zip_map(&delta, |a, d| RHO * a + (1.0 - RHO) * d * d);
        *param = param.zip_map(&delta, |p, d| p - lr * d);
    }
}
