//! Router, static-router, limit-router and protocol error ABI

use alloy::sol;

sol! {
    /// External aggregator leg executed by the router before minting SY
    /// (or after redeeming it). `extRouter == 0` means no swap.
    #[derive(Debug, PartialEq, Eq)]
    struct SwapData {
        address extRouter;
        bytes extCalldata;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TokenInput {
        address tokenIn;
        uint256 netTokenIn;
        address tokenMintSy;
        address bulk;
        SwapData swapData;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TokenOutput {
        address tokenOut;
        uint256 minTokenOut;
        address tokenRedeemSy;
        address bulk;
        SwapData swapData;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 salt;
        uint256 expiry;
        uint256 nonce;
        uint8 orderType;
        address token;
        address yt;
        address maker;
        address receiver;
        uint256 makingAmount;
        uint256 lnImpliedRate;
        uint256 failSafeRate;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct FillOrderParams {
        Order order;
        bytes signature;
        uint256 makingAmount;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct LimitOrderData {
        address limitRouter;
        FillOrderParams[] normalFills;
        FillOrderParams[] flashFills;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct MarketStateView {
        address sy;
        address pt;
        address yt;
        uint256 totalPt;
        uint256 totalSy;
        uint256 totalLp;
        uint256 lnImpliedRate;
        uint256 pyIndex;
        uint256 expiry;
    }

    /// Static-query router: every function is a pure simulation of the
    /// corresponding router action.
    #[derive(Debug, PartialEq, Eq)]
    interface IRouterStatic {
        function getMarketState(address market) external view returns (MarketStateView memory state);

        function mintSyFromTokenStatic(address sy, address tokenIn, uint256 netTokenIn, address bulk) external view returns (uint256 netSyOut);
        function redeemSyToTokenStatic(address sy, address tokenOut, uint256 netSyIn, address bulk) external view returns (uint256 netTokenOut);

        function swapExactSyForPtStatic(address market, uint256 exactSyIn) external view returns (uint256 netPtOut, uint256 netSyFee);
        function swapExactPtForSyStatic(address market, uint256 exactPtIn) external view returns (uint256 netSyOut, uint256 netSyFee);
        function swapExactSyForYtStatic(address market, uint256 exactSyIn) external view returns (uint256 netYtOut, uint256 netSyFee);
        function swapExactYtForSyStatic(address market, uint256 exactYtIn) external view returns (uint256 netSyOut, uint256 netSyFee);

        function addLiquiditySingleSyStatic(address market, uint256 netSyIn) external view returns (uint256 netLpOut, uint256 netSyFee);
        function addLiquidityDualSyAndPtStatic(address market, uint256 netSyDesired, uint256 netPtDesired) external view returns (uint256 netLpOut, uint256 netSyUsed, uint256 netPtUsed);
        function removeLiquidityDualSyAndPtStatic(address market, uint256 netLpToRemove) external view returns (uint256 netSyOut, uint256 netPtOut);

        function mintPyFromSyStatic(address yt, uint256 netSyIn) external view returns (uint256 netPyOut);
    }

    /// State-mutating router. Every output-producing function takes a
    /// minimum-output guard and reverts below it.
    #[derive(Debug, PartialEq, Eq)]
    interface IRouter {
        struct RouterCall {
            bool allowFailure;
            bytes callData;
        }

        struct RouterCallResult {
            bool success;
            bytes returnData;
        }

        function swapExactTokenForPt(address receiver, address market, uint256 minPtOut, TokenInput input, LimitOrderData limit) external payable returns (uint256 netPtOut, uint256 netSyFee);
        function swapExactPtForToken(address receiver, address market, uint256 exactPtIn, TokenOutput output, LimitOrderData limit) external returns (uint256 netTokenOut, uint256 netSyFee);
        function swapExactTokenForYt(address receiver, address market, uint256 minYtOut, TokenInput input, LimitOrderData limit) external payable returns (uint256 netYtOut, uint256 netSyFee);
        function swapExactYtForToken(address receiver, address market, uint256 exactYtIn, TokenOutput output, LimitOrderData limit) external returns (uint256 netTokenOut, uint256 netSyFee);
        function swapExactPtForYt(address receiver, address market, uint256 exactPtIn, uint256 minYtOut, LimitOrderData sellLimit, LimitOrderData buyLimit) external returns (uint256 netYtOut, uint256 netSyFee);
        function swapExactYtForPt(address receiver, address market, uint256 exactYtIn, uint256 minPtOut, LimitOrderData sellLimit, LimitOrderData buyLimit) external returns (uint256 netPtOut, uint256 netSyFee);

        function mintPyFromToken(address receiver, address yt, uint256 minPyOut, TokenInput input) external payable returns (uint256 netPyOut);

        function addLiquiditySingleToken(address receiver, address market, uint256 minLpOut, TokenInput input) external payable returns (uint256 netLpOut, uint256 netSyFee);
        function addLiquidityDualTokenAndPt(address receiver, address market, TokenInput input, uint256 netPtDesired, uint256 minLpOut) external payable returns (uint256 netLpOut, uint256 netPtUsed, uint256 netSyUsed);
        function addLiquiditySingleSy(address receiver, address market, uint256 netSyIn, uint256 minLpOut) external returns (uint256 netLpOut, uint256 netSyFee);

        function removeLiquiditySingleToken(address receiver, address market, uint256 netLpToRemove, TokenOutput output) external returns (uint256 netTokenOut, uint256 netSyFee);
        function removeLiquiditySingleSy(address receiver, address market, uint256 netLpToRemove, uint256 minSyOut) external returns (uint256 netSyOut, uint256 netSyFee);

        function multicall(RouterCall[] calldata calls) external payable returns (RouterCallResult[] memory res);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IStandardizedYield {
        function getTokensIn() external view returns (address[] memory res);
        function getTokensOut() external view returns (address[] memory res);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ILimitRouter {
        function orderStatuses(bytes32[] memory orderHashes) external view returns (uint256[] memory filledAmounts, uint256[] memory remainingAmounts);
    }

    /// Custom errors raised by the router, markets, SY wrappers and limit router
    #[derive(Debug, PartialEq, Eq)]
    interface IProtocolErrors {
        error RouterInsufficientPtOut(uint256 actualPtOut, uint256 requiredPtOut);
        error RouterInsufficientYtOut(uint256 actualYtOut, uint256 requiredYtOut);
        error RouterInsufficientSyOut(uint256 actualSyOut, uint256 requiredSyOut);
        error RouterInsufficientLpOut(uint256 actualLpOut, uint256 requiredLpOut);
        error RouterInsufficientPyOut(uint256 actualPyOut, uint256 requiredPyOut);
        error RouterInsufficientTokenOut(uint256 actualTokenOut, uint256 requiredTokenOut);
        error RouterCallbackNotMarket(address caller);

        error MarketExpired();
        error MarketZeroAmountsInput();
        error MarketInsufficientPtForTrade(int256 currentAmount, int256 requiredAmount);
        error MarketInsufficientSyForTrade(int256 currentAmount, int256 requiredAmount);
        error MarketExchangeRateBelowOne(int256 exchangeRate);

        error SYInvalidTokenIn(address token);
        error SYInvalidTokenOut(address token);
        error SYZeroDeposit();
        error SYZeroRedeem();
        error SYInsufficientSharesOut(uint256 actualSharesOut, uint256 requiredSharesOut);

        error YCExpired();

        error LOOrderExpired(bytes32 orderHash);
        error LOOrderCancelled(bytes32 orderHash);
        error LOInsufficientMakingAmount(bytes32 orderHash, uint256 remaining, uint256 requested);
        error LOInvalidSignature(bytes32 orderHash);
    }
}
