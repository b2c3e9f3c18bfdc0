use crate::math::matrix::Matrix;

/// SGD with optional heavy-ball momentum, for one parameter matrix.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub momentum: f64,
    velocity: Option<Matrix>,
}

impl Sgd {
    pub fn new(momentum: f64) -> Sgd {
        Sgd { momentum, velocity: None }
    }

    /// v = μ·v + g (v = g on the first step); p -= lr·v
    pub fn update(&mut self, param: &mut Matrix, grad: &Matrix, lr: f64) {
        let step = if self.momentum == 0.0 {
            grad.clone()
        } else {
            let v = match self.velocity.take() {
                Some(v) => v.zip_map(grad, |v, g| self.momentum * v + g),
                None => grad.clone(),
            };
            self.velocity = Some(v.clone());
            v
        };
        *param = param.zip_map(&step, |p, s| p - lr * s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_step_moves_against_the_gradient() {
        let mut p = Matrix::row(vec![1.0, 1.0]);
        Sgd::new(0.0).update(&mut p, &Matrix::row(vec![0.5, -0.5]), 0.1);
        assert!((p.data[0][0] - 0.95).abs() < 1e-12);
        assert!((p.data[0][1] - 1.05).abs() < 1e-12);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut p = Matrix::row(vec![0.0]);
        let g = Matrix::row(vec![1.0]);
        let mut sgd = Sgd::new(0.9);
        sgd.update(&mut p, &g, 1.0);
        sgd.update(&mut p, &g, 1.0);
        // -1 then -(0.9 + 1)
        assert!((p.data[0][0] + 2.9).abs() < 1e-12);
    }
}
